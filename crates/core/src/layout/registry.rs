//! Attach-time target resolution and lookup
//!
//! The registry is built once from a layout table, resolving every entry to
//! an absolute address inside the mapped host image. A wrong address is a
//! correctness catastrophe, so anything unverifiable is dropped (or aborts
//! the build, when the target is required) instead of being guessed at.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use serde::Deserialize;
use shale_host::HostModule;

use super::scan;
use super::table::{FieldTable, LayoutTable};

/// Errors from layout loading and resolution
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Failed to read layout table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse layout table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Layout table is for build {expected}, host reports {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("Invalid signature pattern: {0}")]
    InvalidSignature(String),

    #[error("Signature not found in host image: {0}")]
    ScanFailed(String),

    #[error("Resolved address for {0} falls outside the host image")]
    OutOfImage(String),

    #[error("Required target could not be resolved: {0}")]
    UnresolvedRequired(String),

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Field not found: {class}.{field}")]
    FieldNotFound { class: String, field: String },

    #[error("Registry closed")]
    RegistryClosed,

    #[error("Registry already initialized")]
    AlreadyInitialized,

    #[error("Target has neither offset nor signature: {0}")]
    Unresolvable(String),
}

/// Calling convention description for an entry point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    /// Method-style call: implicit receiver as the first argument
    #[default]
    Method,
    /// Free function, no receiver
    Free,
}

bitflags::bitflags! {
    /// Per-target behavior flags from the layout table
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TargetFlags: u8 {
        /// Only callable on the host's logical server thread
        const SERVER_THREAD_ONLY = 1 << 0;
        /// Known-reentrant; shims allow bounded recursion
        const REENTRANT = 1 << 1;
        /// Resolution failure aborts the whole install sequence
        const REQUIRED = 1 << 2;
    }
}

/// One resolved host entry point. Immutable once registered.
#[derive(Debug, Clone)]
pub struct InterceptTarget {
    name: String,
    address: usize,
    convention: Convention,
    flags: TargetFlags,
}

impl InterceptTarget {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute entry point address in this process
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn flags(&self) -> TargetFlags {
        self.flags
    }

    pub fn is_required(&self) -> bool {
        self.flags.contains(TargetFlags::REQUIRED)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, address: usize, flags: TargetFlags) -> Self {
        Self {
            name: name.to_string(),
            address,
            convention: Convention::Method,
            flags,
        }
    }
}

/// Resolved per-build layout registry
///
/// Built once at attach, read-concurrently afterwards. `close()` is called
/// at detach; any resolution after that fails with `RegistryClosed`.
#[derive(Debug)]
pub struct LayoutRegistry {
    build: String,
    targets: HashMap<String, InterceptTarget>,
    fields: HashMap<String, FieldTable>,
    closed: AtomicBool,
}

impl LayoutRegistry {
    /// Resolve a table against the mapped host image
    ///
    /// The table's build string must match the build the host reports;
    /// anything else fails fast rather than installing hooks at wrong
    /// addresses. Non-required targets that fail to resolve are skipped
    /// with a warning; a required one aborts.
    ///
    /// # Safety
    /// The module's segments must describe memory mapped in this process
    /// (signature resolution reads host code bytes).
    pub unsafe fn resolve_table(
        table: LayoutTable,
        module: &HostModule,
        host_build: &str,
    ) -> Result<Self, LayoutError> {
        if table.build != host_build {
            return Err(LayoutError::Mismatch {
                expected: table.build,
                actual: host_build.to_string(),
            });
        }

        let mut targets = HashMap::new();

        for (name, entry) in table.targets {
            let mut flags = TargetFlags::empty();
            flags.set(TargetFlags::SERVER_THREAD_ONLY, entry.server_thread_only);
            flags.set(TargetFlags::REENTRANT, entry.reentrant);
            flags.set(TargetFlags::REQUIRED, entry.required);

            let resolved = match (&entry.offset, &entry.signature) {
                (Some(offset), _) => {
                    let address = module.rva(*offset);
                    if module.contains(address) {
                        Ok(address)
                    } else {
                        Err(LayoutError::OutOfImage(name.clone()))
                    }
                }
                (None, Some(signature)) => scan::find_in_module(&name, module, signature),
                (None, None) => Err(LayoutError::Unresolvable(name.clone())),
            };

            match resolved {
                Ok(address) => {
                    tracing::debug!("Resolved {} -> {:#x}", name, address);
                    targets.insert(
                        name.clone(),
                        InterceptTarget {
                            name,
                            address,
                            convention: entry.convention,
                            flags,
                        },
                    );
                }
                Err(e) if entry.required => {
                    tracing::error!("Required target {} unresolved: {}", name, e);
                    return Err(LayoutError::UnresolvedRequired(name));
                }
                Err(e) => {
                    tracing::warn!("Skipping target {}: {}", name, e);
                }
            }
        }

        tracing::info!(
            "Layout registry ready for build {}: {} targets resolved",
            table.build,
            targets.len()
        );

        Ok(Self {
            build: table.build,
            targets,
            fields: table.fields,
            closed: AtomicBool::new(false),
        })
    }

    /// Host build this registry was verified against
    pub fn build(&self) -> &str {
        &self.build
    }

    /// Look up a resolved entry point by logical name
    pub fn resolve(&self, name: &str) -> Result<&InterceptTarget, LayoutError> {
        if self.is_closed() {
            return Err(LayoutError::RegistryClosed);
        }
        self.targets
            .get(name)
            .ok_or_else(|| LayoutError::NotFound(name.to_string()))
    }

    /// Look up a field offset by class and field name
    pub fn field_offset(&self, class: &str, field: &str) -> Result<i32, LayoutError> {
        if self.is_closed() {
            return Err(LayoutError::RegistryClosed);
        }
        self.fields
            .get(class)
            .and_then(|fields| fields.get(field))
            .copied()
            .ok_or_else(|| LayoutError::FieldNotFound {
                class: class.to_string(),
                field: field.to_string(),
            })
    }

    /// Names of every resolved target
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Shut the registry down; all later resolution fails
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::info!("Layout registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Build a registry directly from resolved parts (used by tests and
    /// by tooling that dumps resolved addresses).
    pub fn from_parts(
        build: String,
        targets: Vec<InterceptTarget>,
        fields: HashMap<String, FieldTable>,
    ) -> Self {
        Self {
            build,
            targets: targets
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
            fields,
            closed: AtomicBool::new(false),
        }
    }
}

/// Process-wide registry, set once during attach
static REGISTRY: OnceLock<LayoutRegistry> = OnceLock::new();

/// Install the global registry. Errors if attach already ran.
pub fn init_global_registry(registry: LayoutRegistry) -> Result<(), LayoutError> {
    REGISTRY
        .set(registry)
        .map_err(|_| LayoutError::AlreadyInitialized)
}

/// The global registry, if attach has run
pub fn global_registry() -> Option<&'static LayoutRegistry> {
    REGISTRY.get()
}
