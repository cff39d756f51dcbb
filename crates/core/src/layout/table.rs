//! Layout table file format
//!
//! One JSON file per supported host build, deployed with the runtime:
//!
//! ```json
//! {
//!     "build": "1.21.3.01",
//!     "targets": {
//!         "ServerNetworkHandler::disconnectClient": {
//!             "signature": "55 48 89 E5 41 57 49 89 F7 ? ? 41 56",
//!             "convention": "method",
//!             "server_thread_only": true,
//!             "required": true
//!         },
//!         "ServerNetworkHandler::updateServerAnnouncement": {
//!             "offset": "0x1a2b3c0"
//!         }
//!     },
//!     "fields": {
//!         "Player": { "name": 592 },
//!         "ChatRecord": { "message": 8 }
//!     }
//! }
//! ```
//!
//! A target resolves either by image-relative offset or by byte signature.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::registry::{Convention, LayoutError};

/// Field offsets for one host class, keyed by field name
pub type FieldTable = HashMap<String, i32>;

/// One entry point in the table
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    /// Image-relative offset, as a hex string ("0x1a2b3c0") or number
    #[serde(default, deserialize_with = "deserialize_offset")]
    pub offset: Option<u64>,

    /// Byte signature with `?` wildcards, scanned over code segments
    #[serde(default)]
    pub signature: Option<String>,

    /// Calling convention description
    #[serde(default)]
    pub convention: Convention,

    /// Only callable on the host's logical server thread
    #[serde(default)]
    pub server_thread_only: bool,

    /// Safe to re-enter from shim logic (bounded recursion allowed)
    #[serde(default)]
    pub reentrant: bool,

    /// Failing to resolve this target aborts the whole install sequence
    #[serde(default)]
    pub required: bool,
}

/// A complete per-build layout table
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutTable {
    /// Exact host build string this table was made for
    pub build: String,

    #[serde(default)]
    pub targets: HashMap<String, TargetEntry>,

    /// class name -> field name -> byte offset
    #[serde(default)]
    pub fields: HashMap<String, FieldTable>,
}

impl LayoutTable {
    /// Load a table from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load a table from a JSON string
    pub fn load_from_str(json: &str) -> Result<Self, LayoutError> {
        let table: LayoutTable = serde_json::from_str(json)?;
        tracing::info!(
            "Loaded layout table for build {}: {} targets, {} classes",
            table.build,
            table.targets.len(),
            table.fields.len()
        );
        Ok(table)
    }
}

/// Accept offsets as hex strings or plain JSON numbers
fn deserialize_offset<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => {
            let digits = s.trim_start_matches("0x").trim_start_matches("0X");
            u64::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid offset: {s}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_table() {
        let json = r#"{
            "build": "1.21.3.01",
            "targets": {
                "ServerNetworkHandler::disconnectClient": {
                    "signature": "55 48 89 E5 41 57",
                    "server_thread_only": true,
                    "required": true
                },
                "ServerNetworkHandler::updateServerAnnouncement": {
                    "offset": "0x1a2b3c0"
                }
            },
            "fields": {
                "Player": { "name": 592 }
            }
        }"#;

        let table = LayoutTable::load_from_str(json).unwrap();
        assert_eq!(table.build, "1.21.3.01");
        assert_eq!(table.targets.len(), 2);

        let disconnect = &table.targets["ServerNetworkHandler::disconnectClient"];
        assert!(disconnect.server_thread_only);
        assert!(disconnect.required);
        assert!(!disconnect.reentrant);
        assert_eq!(disconnect.convention, Convention::Method);

        let announce = &table.targets["ServerNetworkHandler::updateServerAnnouncement"];
        assert_eq!(announce.offset, Some(0x1a2b3c0));
        assert!(!announce.required);

        assert_eq!(table.fields["Player"]["name"], 592);
    }

    #[test]
    fn test_numeric_offset() {
        let json = r#"{
            "build": "x",
            "targets": { "t": { "offset": 4096 } }
        }"#;
        let table = LayoutTable::load_from_str(json).unwrap();
        assert_eq!(table.targets["t"].offset, Some(4096));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(LayoutTable::load_from_str("{ not json").is_err());
    }
}
