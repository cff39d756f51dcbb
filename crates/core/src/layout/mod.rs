//! Layout registry
//!
//! Per-build tables mapping logical host entry points and object fields to
//! concrete addresses and offsets. Tables are deployed as JSON beside the
//! runtime so offsets can be updated without recompiling. Every resolution
//! happens at attach time; an unverifiable target is fatal for that target
//! only, unless it is flagged required.

mod registry;
mod scan;
mod table;

pub use registry::{
    global_registry, init_global_registry, Convention, InterceptTarget, LayoutError,
    LayoutRegistry, TargetFlags,
};
pub use scan::{parse_signature, scan_segment};
pub use table::{FieldTable, LayoutTable, TargetEntry};
