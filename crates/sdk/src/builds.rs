//! Supported host build identifiers
//!
//! Layout tables are keyed by the exact host build string. Attaching to a
//! build with no matching table fails fast rather than guessing offsets.

/// Host builds with shipped layout tables
pub const SUPPORTED_BUILDS: &[&str] = &["1.21.3.01", "1.21.2.02", "1.20.81.01"];

/// Check whether a host build string has a shipped layout table
pub fn is_supported(build: &str) -> bool {
    SUPPORTED_BUILDS.contains(&build)
}
