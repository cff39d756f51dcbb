//! Thread and reentrancy guard
//!
//! The host runs its simulation on one thread and most of its structures
//! are not safe to touch from any other. The guard records which thread
//! that is at attach time; shims consult it on entry and outbound calls
//! refuse to run anywhere else.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

/// Depth at which even a reentrant target stops running injected logic
const MAX_REENTRANT_DEPTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Called from a non-server thread")]
    WrongThread,

    #[error("Server thread not designated")]
    NotDesignated,
}

/// Records the designated server thread
pub struct ThreadGuard {
    server_thread: OnceLock<ThreadId>,
}

impl ThreadGuard {
    pub const fn new() -> Self {
        Self {
            server_thread: OnceLock::new(),
        }
    }

    /// Designate the calling thread as the server thread
    ///
    /// First call wins; later calls are ignored so a re-attach cannot
    /// silently move the designation.
    pub fn designate(&self) {
        let id = thread::current().id();
        if self.server_thread.set(id).is_err() {
            tracing::warn!("Server thread already designated, ignoring");
        } else {
            tracing::debug!("Designated server thread {:?}", id);
        }
    }

    pub fn is_designated(&self) -> bool {
        self.server_thread.get().is_some()
    }

    /// Whether the calling thread is the designated server thread
    pub fn is_server_thread(&self) -> bool {
        self.server_thread
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    pub fn ensure_server_thread(&self) -> Result<(), GuardError> {
        match self.server_thread.get() {
            None => Err(GuardError::NotDesignated),
            Some(id) if *id == thread::current().id() => Ok(()),
            Some(_) => Err(GuardError::WrongThread),
        }
    }
}

impl Default for ThreadGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide server thread designation
pub static SERVER_THREAD: ThreadGuard = ThreadGuard::new();

thread_local! {
    /// Per-thread shim nesting depth, keyed by target name
    static SHIM_DEPTH: RefCell<HashMap<&'static str, usize>> = RefCell::new(HashMap::new());
}

/// Outcome of asking to run injected logic for a target
pub enum Reentry {
    /// Injected logic may run; the scope decrements depth on drop
    Enter(ReentryScope),
    /// Already inside this target on this thread; forward without logic
    ShortCircuit,
}

/// RAII depth marker for one shim activation
pub struct ReentryScope {
    name: &'static str,
}

impl Drop for ReentryScope {
    fn drop(&mut self) {
        SHIM_DEPTH.with(|depths| {
            let mut depths = depths.borrow_mut();
            if let Some(depth) = depths.get_mut(self.name) {
                *depth = depth.saturating_sub(1);
            }
        });
    }
}

/// Enter a shim for `name`, tracking nesting on this thread
///
/// Non-reentrant targets short-circuit on any nested activation. Targets
/// marked reentrant tolerate nesting up to a fixed depth; past that the
/// activation is treated as runaway recursion and short-circuits too.
pub fn enter_shim(name: &'static str, reentrant: bool) -> Reentry {
    SHIM_DEPTH.with(|depths| {
        let mut depths = depths.borrow_mut();
        let depth = depths.entry(name).or_insert(0);

        let limit = if reentrant { MAX_REENTRANT_DEPTH } else { 1 };
        if *depth >= limit {
            if !reentrant {
                tracing::trace!("Reentrant call into '{}' short-circuited", name);
            } else {
                tracing::warn!("Runaway recursion through '{}' (depth {})", name, *depth);
            }
            return Reentry::ShortCircuit;
        }

        *depth += 1;
        Reentry::Enter(ReentryScope { name })
    })
}

/// Run `f` only if called from the designated server thread
///
/// Outbound path for injected code that wants to call into the host. The
/// closure never runs from the wrong thread, so host memory is never
/// touched off-thread.
pub fn invoke_on_server_thread<R>(
    guard: &ThreadGuard,
    f: impl FnOnce() -> R,
) -> Result<R, GuardError> {
    guard.ensure_server_thread()?;
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_designation_and_membership() {
        let guard = ThreadGuard::new();
        assert!(!guard.is_designated());
        assert!(matches!(
            guard.ensure_server_thread(),
            Err(GuardError::NotDesignated)
        ));

        guard.designate();
        assert!(guard.is_designated());
        assert!(guard.is_server_thread());
        assert!(guard.ensure_server_thread().is_ok());
    }

    #[test]
    fn test_wrong_thread_is_rejected() {
        let guard = std::sync::Arc::new(ThreadGuard::new());
        guard.designate();

        let g = guard.clone();
        let result = std::thread::spawn(move || {
            assert!(!g.is_server_thread());
            invoke_on_server_thread(&g, || 5)
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(GuardError::WrongThread)));

        // Still fine from the designating thread.
        assert_eq!(invoke_on_server_thread(&guard, || 5).unwrap(), 5);
    }

    #[test]
    fn test_designation_is_sticky() {
        let guard = std::sync::Arc::new(ThreadGuard::new());
        guard.designate();

        let g = guard.clone();
        std::thread::spawn(move || g.designate()).join().unwrap();

        // The second designate from another thread did not steal it.
        assert!(guard.is_server_thread());
    }

    #[test]
    fn test_non_reentrant_short_circuits() {
        let outer = enter_shim("guard_test::outer", false);
        assert!(matches!(outer, Reentry::Enter(_)));

        // Nested activation of the same target short-circuits.
        assert!(matches!(
            enter_shim("guard_test::outer", false),
            Reentry::ShortCircuit
        ));

        // A different target is unaffected.
        assert!(matches!(
            enter_shim("guard_test::other", false),
            Reentry::Enter(_)
        ));

        drop(outer);
        assert!(matches!(
            enter_shim("guard_test::outer", false),
            Reentry::Enter(_)
        ));
    }

    #[test]
    fn test_reentrant_allows_nesting_up_to_limit() {
        let mut scopes = Vec::new();
        for _ in 0..MAX_REENTRANT_DEPTH {
            match enter_shim("guard_test::reentrant", true) {
                Reentry::Enter(scope) => scopes.push(scope),
                Reentry::ShortCircuit => panic!("should nest below the limit"),
            }
        }

        assert!(matches!(
            enter_shim("guard_test::reentrant", true),
            Reentry::ShortCircuit
        ));

        scopes.clear();
        assert!(matches!(
            enter_shim("guard_test::reentrant", true),
            Reentry::Enter(_)
        ));
    }

    #[test]
    fn test_depth_is_per_thread() {
        let _outer = enter_shim("guard_test::threaded", false);

        std::thread::spawn(|| {
            assert!(matches!(
                enter_shim("guard_test::threaded", false),
                Reentry::Enter(_)
            ));
        })
        .join()
        .unwrap();
    }
}
