//! Global host attach state
//!
//! Populated once during attach and read-only afterwards. Access is
//! thread-safe via OnceLock.

use std::sync::OnceLock;

use crate::error::HostError;
use crate::module::HostModule;

/// Process-wide state captured at attach time
pub struct HostGlobals {
    /// The host server image
    pub module: HostModule,

    /// Exact host build string the layout table was verified against
    pub build: String,
}

/// Global host state storage
static HOST: OnceLock<HostGlobals> = OnceLock::new();

impl HostGlobals {
    pub fn new(module: HostModule, build: String) -> Self {
        if !shale_sdk::builds::is_supported(&build) {
            tracing::warn!("Host build {} has no shipped layout table", build);
        }
        Self { module, build }
    }
}

/// Initialize host globals
///
/// Called once during attach. Returns error if already initialized.
pub fn init_host(globals: HostGlobals) -> Result<(), HostError> {
    HOST.set(globals).map_err(|_| HostError::AlreadyInitialized)
}

/// Get host globals
///
/// # Panics
/// Panics if called before `init_host`
pub fn host() -> &'static HostGlobals {
    HOST.get().expect("Host not initialized")
}

/// Try to get host globals without panicking
pub fn try_host() -> Option<&'static HostGlobals> {
    HOST.get()
}

/// Check if host globals are initialized
pub fn is_host_initialized() -> bool {
    HOST.get().is_some()
}
