//! Error types for host process introspection

/// Error type for host discovery and attach-state operations
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host server image could not be located in this process
    #[error("Host module not found: {0}")]
    ModuleNotFound(String),

    /// Host discovery is not implemented for this platform
    #[error("Unsupported platform: {0}")]
    Unsupported(&'static str),

    /// Host globals already initialized
    #[error("Host already initialized")]
    AlreadyInitialized,

    /// The host build string could not be determined
    #[error("Unknown host build")]
    UnknownBuild,
}
