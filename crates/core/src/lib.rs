//! Runtime interception core
//!
//! Everything needed to sit between a closed host server binary and
//! injected logic: per-build layout tables resolved against the mapped
//! image, inline detours with retained originals, a guarded dispatch
//! funnel, and an event bridge that lets listeners observe, rewrite or
//! cancel intercepted host calls.

pub mod config;
pub mod events;
pub mod hooks;
pub mod layout;
pub mod shim;
pub mod shims;
pub mod view;

pub use config::RuntimeConfig;
pub use events::{bridge, register_listener, EventBridge, EventPayload, InterceptEvent};
pub use hooks::{hooks, HookError, HookManager};
pub use layout::{LayoutError, LayoutRegistry, LayoutTable};
pub use shim::{invoke_on_server_thread, GuardError, SERVER_THREAD};
pub use view::{HostField, HostObjectView};
