//! Runtime configuration
//!
//! A small TOML file beside the runtime library controls where layout
//! tables are found and how chatty logging is. Every key has a default;
//! a missing config file is not an error.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding per-build layout tables, relative to the base dir
    pub layout_dir: PathBuf,
    /// Tracing filter directive, overridable by `SHALE_LOG`
    pub log_filter: String,
    /// Fail attach when any shim is skipped, not only required targets
    pub strict_install: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            layout_dir: PathBuf::from("layouts"),
            log_filter: "info".to_string(),
            strict_install: false,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::load_from_str(&text)?)
    }

    pub fn load_from_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `shale.toml` from the base dir, defaulting when absent
    pub fn load_default() -> Self {
        let path = base_dir().join("shale.toml");
        match Self::load(&path) {
            Ok(config) => config,
            Err(ConfigError::Io(_)) => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Bad config at {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Layout table path for a host build
    pub fn layout_file(&self, build: &str) -> PathBuf {
        base_dir().join(&self.layout_dir).join(format!("{build}.json"))
    }
}

/// Base directory for config and layout tables
///
/// `SHALE_HOME` wins; otherwise the directory holding the running
/// executable, falling back to the working directory.
pub fn base_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("SHALE_HOME") {
        return PathBuf::from(home);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
