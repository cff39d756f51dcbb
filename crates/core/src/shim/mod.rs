//! Shim dispatch
//!
//! Every intercepted host call passes through here: the guard decides
//! whether injected logic may run on this thread and at this reentrancy
//! depth, and the dispatcher wraps the pre/post logic in panic containment
//! so a fault in injected code degrades to pass-through instead of
//! unwinding into the host.

mod dispatch;
mod guard;

pub use dispatch::{dispatch, ShimContext, ShimDecision};
pub use guard::{
    enter_shim, invoke_on_server_thread, GuardError, Reentry, ReentryScope, ThreadGuard,
    SERVER_THREAD,
};
