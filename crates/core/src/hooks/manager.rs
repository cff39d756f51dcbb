//! Hook lifecycle registry
//!
//! Owns every installed trampoline for the lifetime of the process.
//! Installation happens during attach, uninstallation during detach; in
//! between, shims look up their original-implementation pointers here by
//! logical target name.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

use crate::layout::InterceptTarget;

use super::detour::{self, HookError, Patch};

new_key_type! {
    /// Handle for an installed hook
    pub struct HookKey;
}

/// One installed redirect plus its retained original
///
/// Either fully installed (redirect active, original reachable through the
/// trampoline) or absent from the registry; no partial state is ever
/// observable.
pub struct Trampoline {
    name: String,
    patch: Patch,
}

impl Trampoline {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_address(&self) -> usize {
        self.patch.target()
    }

    /// Pointer that invokes the original implementation
    pub fn original(&self) -> *const () {
        self.patch.trampoline()
    }
}

// SAFETY: Patch contents are only mutated through the manager's write lock
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

struct Inner {
    hooks: SlotMap<HookKey, Trampoline>,
    by_name: HashMap<String, HookKey>,
}

/// Central hook registry
pub struct HookManager {
    inner: RwLock<Inner>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                hooks: SlotMap::with_key(),
                by_name: HashMap::new(),
            }),
        }
    }

    /// Install a detour over a resolved target
    ///
    /// `publish` receives the original-implementation pointer after the
    /// redirect is staged but before the entry point is patched, so the
    /// shim can already reach the original on the very first redirected
    /// call.
    ///
    /// # Safety
    /// `shim` must be an ABI-compatible replacement for the target's entry
    /// point.
    pub unsafe fn install(
        &self,
        target: &InterceptTarget,
        shim: *const (),
        publish: impl FnOnce(*const ()),
    ) -> Result<HookKey, HookError> {
        let mut inner = self.inner.write();

        if inner.by_name.contains_key(target.name()) {
            return Err(HookError::AlreadyInstalled(target.name().to_string()));
        }

        let staged = detour::prepare(target.address(), shim as usize)?;
        publish(staged.trampoline());
        let patch = staged.activate()?;
        let name = target.name().to_string();

        let key = inner.hooks.insert(Trampoline {
            name: name.clone(),
            patch,
        });
        inner.by_name.insert(name, key);

        tracing::info!("Installed hook '{}' at {:#x}", target.name(), target.address());
        Ok(key)
    }

    /// Remove a hook and restore the entry point byte-for-byte
    pub fn uninstall(&self, key: HookKey) -> Result<(), HookError> {
        let mut inner = self.inner.write();
        let trampoline = inner.hooks.remove(key).ok_or(HookError::NotInstalled)?;
        inner.by_name.remove(&trampoline.name);

        unsafe { detour::uninstall(&trampoline.patch)? };
        tracing::info!(
            "Uninstalled hook '{}' at {:#x}",
            trampoline.name,
            trampoline.patch.target()
        );
        Ok(())
    }

    /// Remove a hook by logical target name
    pub fn uninstall_by_name(&self, name: &str) -> Result<(), HookError> {
        let key = self
            .inner
            .read()
            .by_name
            .get(name)
            .copied()
            .ok_or(HookError::NotInstalled)?;
        self.uninstall(key)
    }

    /// Remove every installed hook (detach path)
    pub fn uninstall_all(&self) {
        let mut inner = self.inner.write();
        let hooks = std::mem::take(&mut inner.hooks);
        inner.by_name.clear();
        drop(inner);

        for (_, trampoline) in hooks {
            if let Err(e) = unsafe { detour::uninstall(&trampoline.patch) } {
                tracing::error!("Failed to restore '{}': {}", trampoline.name, e);
            } else {
                tracing::info!("Uninstalled hook '{}'", trampoline.name);
            }
        }
    }

    /// Original-implementation pointer for an installed target
    pub fn original(&self, name: &str) -> Option<*const ()> {
        let inner = self.inner.read();
        let key = inner.by_name.get(name)?;
        inner.hooks.get(*key).map(Trampoline::original)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    pub fn installed_count(&self) -> usize {
        self.inner.read().hooks.len()
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide hook registry
static HOOKS: LazyLock<HookManager> = LazyLock::new(HookManager::new);

/// The global hook registry
pub fn hooks() -> &'static HookManager {
    &HOOKS
}
