//! Trampoline manager
//!
//! Inline detours over host entry points: an installed hook patches the
//! entry with a jump to our shim and keeps the displaced prologue callable
//! in a trampoline, so the original implementation stays reachable through
//! a stored pointer. Uninstall restores the entry byte-for-byte.

mod detour;
mod manager;
mod trampoline;

pub use detour::HookError;
pub use manager::{hooks, HookKey, HookManager, Trampoline};
pub use trampoline::alloc_executable;
