//! shale host - Host process introspection and global storage
//!
//! Discovers the host server image inside the process we were injected
//! into and stores process-wide attach state. Everything here is resolved
//! once at attach time; the rest of the runtime reads it through
//! [`globals::host`].

pub mod error;
pub mod globals;
pub mod module;

pub use error::HostError;
pub use globals::{host, init_host, is_host_initialized, try_host, HostGlobals};
pub use module::{find_host_module, HostModule, Segment};
