//! Shim call dispatch
//!
//! One funnel for every intercepted call. The pre closure runs injected
//! logic and decides what happens to the original; the post closure sees
//! the outcome. Both are panic-contained: a fault in injected code logs
//! and the call degrades to plain pass-through, never unwinding into the
//! host's frames.

use std::panic::{catch_unwind, AssertUnwindSafe};

use super::guard::{enter_shim, Reentry, ThreadGuard};

/// Static facts about an intercepted target, baked into each shim
pub struct ShimContext {
    pub name: &'static str,
    pub reentrant: bool,
    pub server_thread_only: bool,
}

/// What the pre logic wants done with the original call
pub enum ShimDecision<'a, R> {
    /// Call the original with its arguments untouched
    Forward,
    /// Skip the original entirely and return this value
    Replace(R),
    /// Run this closure in place of the plain original call; typically it
    /// invokes the original itself with rewritten arguments
    Invoke(Box<dyn FnOnce() -> R + 'a>),
}

/// Dispatch one intercepted call
///
/// `original` must invoke the retained original implementation with the
/// caller's arguments. The guard, reentrancy and panic rules all resolve
/// to the same safe default: run the original as if nothing was hooked.
pub fn dispatch<'a, R>(
    ctx: &ShimContext,
    guard: &ThreadGuard,
    original: impl FnOnce() -> R,
    pre: impl FnOnce() -> ShimDecision<'a, R>,
    post: impl FnOnce(&R),
) -> R {
    if ctx.server_thread_only && guard.ensure_server_thread().is_err() {
        tracing::warn!("'{}' called off the server thread, forwarding", ctx.name);
        return original();
    }

    // The scope covers the original call too, so anything the host does
    // underneath us counts as nested.
    let _scope = match enter_shim(ctx.name, ctx.reentrant) {
        Reentry::Enter(scope) => scope,
        Reentry::ShortCircuit => return original(),
    };

    let decision = match catch_unwind(AssertUnwindSafe(pre)) {
        Ok(decision) => decision,
        Err(_) => {
            tracing::error!("Panic in '{}' pre logic, forwarding", ctx.name);
            ShimDecision::Forward
        }
    };

    let result = match decision {
        ShimDecision::Forward => original(),
        ShimDecision::Replace(value) => value,
        ShimDecision::Invoke(f) => match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => value,
            Err(_) => {
                tracing::error!("Panic in '{}' replacement call, forwarding", ctx.name);
                original()
            }
        },
    };

    if catch_unwind(AssertUnwindSafe(|| post(&result))).is_err() {
        tracing::error!("Panic in '{}' post logic", ctx.name);
    }

    result
}
