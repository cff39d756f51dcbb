//! Event bridge
//!
//! Intercepted host calls are surfaced as events. Listeners run in
//! registration order, may rewrite the payload, and may cancel the event
//! to suppress the host behavior that triggered it.

mod bridge;
mod types;

pub use bridge::{bridge, register_listener, remove_listener, EventBridge, ListenerKey};
pub use types::{names, EventPayload, InterceptEvent};
