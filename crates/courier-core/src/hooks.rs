//! Hook emitter
//!
//! Observer surface for `send`, `publish`, and `error`. Listeners fire
//! synchronously, in registration order, on the task performing the
//! operation. Firing walks a snapshot of the listener list, so a listener
//! registered during a firing is not invoked for that firing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use courier_messages::MessageAttributes;

use crate::handler::HandlerError;

/// Handle returned by listener registration, used for removal
///
/// Closures are not comparable in Rust, so removal goes through the handle
/// instead of the original function reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Listener for `send` and `publish` hooks: `(name, body, attributes)`
pub type MessageListener = Arc<dyn Fn(&str, &Value, &MessageAttributes) + Send + Sync>;

/// Listener for the `error` hook
pub type ErrorListener = Arc<dyn Fn(&FailedMessage<'_>) + Send + Sync>;

/// A message whose handling failed, as seen by the `error` hook
///
/// Transport-erased view: the envelope itself stays with the dispatch
/// loop; its identity and receive count are surfaced here.
#[derive(Debug)]
pub struct FailedMessage<'a> {
    /// Message name, when the body carried one
    pub name: Option<&'a str>,

    /// Decoded message document
    pub body: &'a Value,

    /// Attributes the message arrived with
    pub attributes: &'a MessageAttributes,

    /// Transport-assigned message id
    pub message_id: Option<&'a str>,

    /// Receive count at the time of the failure
    pub seen_count: u32,

    /// The failure itself
    pub error: &'a HandlerError,
}

/// Multi-listener observer for bus hooks
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    send: RwLock<Vec<(HookId, MessageListener)>>,
    publish: RwLock<Vec<(HookId, MessageListener)>>,
    error: RwLock<Vec<(HookId, ErrorListener)>>,
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HookId {
        HookId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a `send` listener
    pub fn on_send(&self, listener: impl Fn(&str, &Value, &MessageAttributes) + Send + Sync + 'static) -> HookId {
        let id = self.next_id();
        self.send.write().push((id, Arc::new(listener)));
        id
    }

    /// Register a `publish` listener
    pub fn on_publish(
        &self,
        listener: impl Fn(&str, &Value, &MessageAttributes) + Send + Sync + 'static,
    ) -> HookId {
        let id = self.next_id();
        self.publish.write().push((id, Arc::new(listener)));
        id
    }

    /// Register an `error` listener
    pub fn on_error(&self, listener: impl Fn(&FailedMessage<'_>) + Send + Sync + 'static) -> HookId {
        let id = self.next_id();
        self.error.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns whether it was present
    pub fn off(&self, id: HookId) -> bool {
        for list in [&self.send, &self.publish] {
            let mut listeners = list.write();
            if let Some(position) = listeners.iter().position(|(i, _)| *i == id) {
                listeners.remove(position);
                return true;
            }
        }
        let mut listeners = self.error.write();
        if let Some(position) = listeners.iter().position(|(i, _)| *i == id) {
            listeners.remove(position);
            return true;
        }
        false
    }

    /// Fire the `send` hook
    pub fn emit_send(&self, name: &str, body: &Value, attributes: &MessageAttributes) {
        let snapshot: Vec<MessageListener> =
            self.send.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(name, body, attributes);
        }
    }

    /// Fire the `publish` hook
    pub fn emit_publish(&self, name: &str, body: &Value, attributes: &MessageAttributes) {
        let snapshot: Vec<MessageListener> =
            self.publish.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(name, body, attributes);
        }
    }

    /// Fire the `error` hook
    pub fn emit_error(&self, failed: &FailedMessage<'_>) {
        let snapshot: Vec<ErrorListener> =
            self.error.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let hooks = HookRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o = order.clone();
        hooks.on_send(move |_, _, _| o.lock().push(1));
        let o = order.clone();
        hooks.on_send(move |_, _, _| o.lock().push(2));

        hooks.emit_send("a", &json!({}), &MessageAttributes::default());
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_off_removes_listener() {
        let hooks = HookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = hooks.on_send(move |_, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        hooks.emit_send("a", &json!({}), &MessageAttributes::default());
        assert!(hooks.off(id));
        hooks.emit_send("a", &json!({}), &MessageAttributes::default());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!hooks.off(id));
    }

    #[test]
    fn test_publish_and_send_lists_are_independent() {
        let hooks = HookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        hooks.on_publish(move |_, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        hooks.emit_send("a", &json!({}), &MessageAttributes::default());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        hooks.emit_publish("a", &json!({}), &MessageAttributes::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_mid_firing_not_invoked() {
        let hooks = Arc::new(HookRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));

        let h = hooks.clone();
        let c = count.clone();
        hooks.on_send(move |_, _, _| {
            let c2 = c.clone();
            h.on_send(move |_, _, _| {
                c2.fetch_add(1, Ordering::SeqCst);
            });
        });

        hooks.emit_send("a", &json!({}), &MessageAttributes::default());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
