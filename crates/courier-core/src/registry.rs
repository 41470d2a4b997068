//! Handler registry
//!
//! Maps message names to ordered handler lists, plus predicate resolvers
//! for external messages that arrive without a recognized `$name`.
//! Mutated only during configuration; the bus freezes it behind `Arc` at
//! initialize, after which it is read-only.

use std::any::type_name;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use courier_messages::Message;

use crate::error::BusError;
use crate::handler::{erase_handler, HandlerError, HandlerFn, Handling};

/// Predicate deciding whether a resolver accepts a raw message body
pub type ResolverPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

struct NamedHandler {
    /// Identity used for duplicate detection (`std::any::type_name` for
    /// typed registrations, a synthesized name for workflow wiring)
    handler_name: String,
    handler: HandlerFn,
}

struct Registration {
    message_type: &'static str,
    handlers: Vec<NamedHandler>,
}

struct Resolver {
    predicate: ResolverPredicate,
    handler: NamedHandler,
    topic_identifier: Option<String>,
}

/// Registry of message handlers
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: HashMap<String, Registration>,
    resolvers: Vec<Resolver>,
    // Names warned about once, so a hot unroutable message does not flood
    // the log
    unhandled: Mutex<HashSet<String>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under `M::NAME`
    pub fn register<M, F, Fut>(&mut self, handler: F) -> Result<(), BusError>
    where
        M: Message,
        F: Fn(Handling<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_erased(
            M::NAME,
            type_name::<M>(),
            type_name::<F>().to_string(),
            erase_handler(handler),
        )
    }

    /// Register a typed handler that is additionally routable by predicate
    ///
    /// The predicate inspects the raw message body, so messages arriving
    /// without a `$name` (authored outside this bus) can still be routed.
    /// `topic_identifier` names the external topic the message originates
    /// from, for transports that need to subscribe to it.
    pub fn register_resolver<M, F, Fut, P>(
        &mut self,
        predicate: P,
        topic_identifier: Option<String>,
        handler: F,
    ) -> Result<(), BusError>
    where
        M: Message,
        F: Fn(Handling<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let handler_name = type_name::<F>().to_string();
        let erased = erase_handler(handler);
        self.register_erased(
            M::NAME,
            type_name::<M>(),
            handler_name.clone(),
            erased.clone(),
        )?;
        self.resolvers.push(Resolver {
            predicate: Arc::new(predicate),
            handler: NamedHandler {
                handler_name,
                handler: erased,
            },
            topic_identifier,
        });
        Ok(())
    }

    /// Register an already-erased handler under an explicit name
    ///
    /// Used by the workflow registry when wiring step handlers.
    pub(crate) fn register_erased(
        &mut self,
        message_name: &str,
        message_type: &'static str,
        handler_name: String,
        handler: HandlerFn,
    ) -> Result<(), BusError> {
        let registration = self
            .registrations
            .entry(message_name.to_string())
            .or_insert_with(|| Registration {
                message_type,
                handlers: Vec::new(),
            });

        if registration
            .handlers
            .iter()
            .any(|h| h.handler_name == handler_name)
        {
            return Err(BusError::HandlerAlreadyRegistered {
                message_name: message_name.to_string(),
                handler_name,
            });
        }

        registration.handlers.push(NamedHandler {
            handler_name,
            handler,
        });
        Ok(())
    }

    /// Resolve the handlers for an incoming message
    ///
    /// Keyed handlers first (when the message carries a name), then
    /// resolver handlers whose predicate accepts the body, in registration
    /// order. An empty result for a named message is warned once per name.
    pub fn get(&self, name: Option<&str>, body: &Value) -> Vec<HandlerFn> {
        let mut handlers = Vec::new();

        if let Some(name) = name {
            if let Some(registration) = self.registrations.get(name) {
                handlers.extend(registration.handlers.iter().map(|h| h.handler.clone()));
            }
        }

        for resolver in &self.resolvers {
            if (resolver.predicate)(body) {
                handlers.push(resolver.handler.handler.clone());
            }
        }

        if handlers.is_empty() {
            if let Some(name) = name {
                if self.unhandled.lock().insert(name.to_string()) {
                    warn!(message_name = %name, "no handlers registered for message");
                }
            }
        }

        handlers
    }

    /// All registered message names
    pub fn message_names(&self) -> Vec<&str> {
        self.registrations.keys().map(|k| k.as_str()).collect()
    }

    /// Reverse lookup of the Rust type registered under a message name
    pub fn message_type(&self, name: &str) -> Option<&'static str> {
        self.registrations.get(name).map(|r| r.message_type)
    }

    /// Whether any handler is keyed under this name
    pub fn is_registered(&self, name: &str) -> bool {
        self.registrations.contains_key(name)
    }

    /// External topics named by resolver registrations
    pub fn topic_identifiers(&self) -> Vec<&str> {
        self.resolvers
            .iter()
            .filter_map(|r| r.topic_identifier.as_deref())
            .collect()
    }

    /// Clear all state (for testing)
    pub fn reset(&mut self) {
        self.registrations.clear();
        self.resolvers.clear();
        self.unhandled.lock().clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_names", &self.registrations.keys().collect::<Vec<_>>())
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestEvent {
        value: i32,
    }

    impl Message for TestEvent {
        const NAME: &'static str = "test/test-event";
    }

    async fn noop(_h: Handling<TestEvent>) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry.register::<TestEvent, _, _>(noop).unwrap();

        assert!(registry.is_registered("test/test-event"));
        assert_eq!(registry.message_names(), vec!["test/test-event"]);
        assert!(registry
            .message_type("test/test-event")
            .unwrap()
            .contains("TestEvent"));

        let handlers = registry.get(Some("test/test-event"), &json!({}));
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = HandlerRegistry::new();
        registry.register::<TestEvent, _, _>(noop).unwrap();

        let result = registry.register::<TestEvent, _, _>(noop);
        assert!(matches!(
            result,
            Err(BusError::HandlerAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_distinct_handlers_coexist() {
        let mut registry = HandlerRegistry::new();
        registry.register::<TestEvent, _, _>(noop).unwrap();
        registry
            .register::<TestEvent, _, _>(|_h: Handling<TestEvent>| async { Ok(()) })
            .unwrap();

        let handlers = registry.get(Some("test/test-event"), &json!({}));
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn test_resolver_routes_unnamed_message() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_resolver::<TestEvent, _, _, _>(
                |body| body.get("value").is_some(),
                Some("external-topic".to_string()),
                noop,
            )
            .unwrap();

        // No $name on the body, predicate matches anyway
        let handlers = registry.get(None, &json!({ "value": 1 }));
        assert_eq!(handlers.len(), 1);

        let handlers = registry.get(None, &json!({ "other": 1 }));
        assert!(handlers.is_empty());

        assert_eq!(registry.topic_identifiers(), vec!["external-topic"]);
    }

    #[test]
    fn test_unknown_name_returns_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(Some("nobody/home"), &json!({})).is_empty());
        assert_eq!(registry.message_type("nobody/home"), None);
    }

    #[test]
    fn test_reset() {
        let mut registry = HandlerRegistry::new();
        registry.register::<TestEvent, _, _>(noop).unwrap();
        registry.reset();
        assert!(registry.message_names().is_empty());
    }
}
