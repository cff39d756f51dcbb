//! shale SDK - Dedicated Server Type Definitions
//!
//! This crate contains opaque type definitions for objects that live inside
//! the closed-source dedicated server process. It has no dependencies and
//! compiles quickly, allowing parallel compilation of dependent crates.
//!
//! # Modules
//!
//! - [`types`] - Opaque host object types
//! - [`builds`] - Supported host build identifiers
//! - [`cxx`] - ABI mirrors of host C++ standard library types

pub mod builds;
pub mod cxx;
pub mod types;

pub use builds::SUPPORTED_BUILDS;
pub use cxx::{StdString, StdStringBuf};
pub use types::*;
