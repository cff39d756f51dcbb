//! Listener registry and dispatch

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

use super::types::InterceptEvent;

new_key_type! {
    /// Handle for a registered listener
    pub struct ListenerKey;
}

type Callback = Arc<dyn Fn(&mut InterceptEvent) + Send + Sync>;

struct ListenerEntry {
    /// Logical event name this listener is subscribed to
    event: String,
    callback: Callback,
}

struct Inner {
    listeners: SlotMap<ListenerKey, ListenerEntry>,
    /// Dispatch order; registration order per event name is the contract
    order: Vec<ListenerKey>,
}

/// Routes intercepted-call events to registered listeners
pub struct EventBridge {
    inner: RwLock<Inner>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                listeners: SlotMap::with_key(),
                order: Vec::new(),
            }),
        }
    }

    /// Register a listener for one event name
    ///
    /// The listener only sees events whose name matches, and runs after
    /// every listener already registered for that name.
    pub fn register<F>(&self, event: impl Into<String>, callback: F) -> ListenerKey
    where
        F: Fn(&mut InterceptEvent) + Send + Sync + 'static,
    {
        let event = event.into();
        let mut inner = self.inner.write();
        let key = inner.listeners.insert(ListenerEntry {
            event: event.clone(),
            callback: Arc::new(callback),
        });
        inner.order.push(key);
        tracing::debug!("Registered listener for '{}'", event);
        key
    }

    /// Remove a listener; returns whether it was present
    pub fn remove(&self, key: ListenerKey) -> bool {
        let mut inner = self.inner.write();
        match inner.listeners.remove(key) {
            Some(entry) => {
                inner.order.retain(|k| *k != key);
                tracing::debug!("Removed listener for '{}'", entry.event);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.read().listeners.len()
    }

    /// Run every listener registered for this event's name, in
    /// registration order
    ///
    /// Listeners subscribed to other event names never see the event. A
    /// panicking listener is logged and skipped; later listeners still
    /// run and whatever it already wrote to the event stands.
    pub fn dispatch(&self, event: &mut InterceptEvent) {
        // Snapshot outside the lock so listeners can register or remove
        // listeners without deadlocking.
        let snapshot: Vec<Callback> = {
            let inner = self.inner.read();
            inner
                .order
                .iter()
                .filter_map(|key| inner.listeners.get(*key))
                .filter(|entry| entry.event == event.name())
                .map(|entry| entry.callback.clone())
                .collect()
        };

        for callback in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&mut *event)
            }));
            if result.is_err() {
                tracing::error!("Listener panicked handling '{}'", event.name());
            }
        }
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide event bridge
static BRIDGE: LazyLock<EventBridge> = LazyLock::new(EventBridge::new);

/// The global event bridge
pub fn bridge() -> &'static EventBridge {
    &BRIDGE
}

/// Register a listener for one event name on the global bridge
pub fn register_listener<F>(event: impl Into<String>, callback: F) -> ListenerKey
where
    F: Fn(&mut InterceptEvent) + Send + Sync + 'static,
{
    bridge().register(event, callback)
}

/// Remove a listener from the global bridge
pub fn remove_listener(key: ListenerKey) -> bool {
    bridge().remove(key)
}
