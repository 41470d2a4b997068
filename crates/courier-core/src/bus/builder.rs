//! Bus configuration builder
//!
//! The builder is the only way to install dependencies on a bus. It owns
//! every mutable registry; `initialize()` performs the one-time wiring and
//! freezes them into the running bus.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;

use courier_messages::Message;
use serde_json::Value;

use crate::error::BusError;
use crate::handler::{HandlerError, Handling};
use crate::hooks::HookRegistry;
use crate::persistence::WorkflowStore;
use crate::registry::HandlerRegistry;
use crate::serializer::{JsonSerializer, Serializer};
use crate::transport::{MessageSender, Transport};
use crate::workflow::{WorkflowDefinition, WorkflowRegistry, WorkflowState};

use super::{Bus, BusClient, BusInner, BusState};

/// Placeholder transport for a builder that has not been given one
pub struct NoTransport;

/// Builder returned by [`Bus::configure`]
pub struct BusBuilder<T = NoTransport> {
    transport: T,
    serializer: Arc<dyn Serializer>,
    persistence: Option<Arc<dyn WorkflowStore>>,
    handlers: HandlerRegistry,
    workflows: WorkflowRegistry,
    concurrency: usize,
}

impl BusBuilder<NoTransport> {
    pub(super) fn new() -> Self {
        Self {
            transport: NoTransport,
            serializer: Arc::new(JsonSerializer),
            persistence: None,
            handlers: HandlerRegistry::new(),
            workflows: WorkflowRegistry::new(),
            concurrency: 1,
        }
    }

    /// Install the transport the bus runs against
    pub fn with_transport<T: Transport>(self, transport: T) -> BusBuilder<T> {
        BusBuilder {
            transport,
            serializer: self.serializer,
            persistence: self.persistence,
            handlers: self.handlers,
            workflows: self.workflows,
            concurrency: self.concurrency,
        }
    }
}

impl<X> BusBuilder<X> {
    /// Replace the default JSON serializer
    pub fn with_serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Install the workflow persistence backend
    pub fn with_persistence(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Set the number of messages handled concurrently (default 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Subscribe a handler to a message type
    pub fn with_handler<M, F, Fut>(mut self, handler: F) -> Result<Self, BusError>
    where
        M: Message,
        F: Fn(Handling<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.register::<M, F, Fut>(handler)?;
        Ok(self)
    }

    /// Subscribe a handler that is additionally routable by predicate
    ///
    /// For messages authored outside this bus: the predicate inspects the
    /// raw body of messages arriving without a recognized `$name`.
    pub fn with_resolver<M, F, Fut, P>(
        mut self,
        predicate: P,
        topic_identifier: Option<String>,
        handler: F,
    ) -> Result<Self, BusError>
    where
        M: Message,
        F: Fn(Handling<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.handlers
            .register_resolver::<M, F, Fut, P>(predicate, topic_identifier, handler)?;
        Ok(self)
    }

    /// Register a workflow
    pub fn with_workflow<S: WorkflowState>(
        mut self,
        definition: WorkflowDefinition<S>,
    ) -> Result<Self, BusError> {
        self.workflows.register(definition)?;
        Ok(self)
    }
}

impl<T: Transport> BusBuilder<T> {
    /// Perform the one-time wiring and produce an initialized bus
    ///
    /// Workflows are wired into the handler registry, the persistence
    /// backend gets its startup hook, and all registries freeze. No
    /// registration is possible afterward.
    pub async fn initialize(mut self) -> Result<Bus<T>, BusError> {
        if let Some(store) = &self.persistence {
            store.initialize().await?;
        }
        self.workflows
            .initialize(&mut self.handlers, self.persistence.as_ref())
            .await?;

        let transport = Arc::new(self.transport);
        let hooks = Arc::new(HookRegistry::new());
        let sender: Arc<dyn MessageSender> = transport.clone();
        let client = BusClient::new(sender, self.serializer.clone(), hooks.clone());
        let (shutdown_tx, _) = watch::channel(false);

        let registry = Arc::new(self.handlers);
        info!(
            messages = registry.message_names().len(),
            workflows = self.workflows.workflow_names().len(),
            "bus initialized"
        );

        Ok(Bus {
            inner: Arc::new(BusInner {
                transport,
                serializer: self.serializer,
                registry,
                hooks,
                client,
                persistence: self.persistence,
                workflows: self.workflows,
                concurrency: self.concurrency,
                state: RwLock::new(BusState::Initialized),
                shutdown_tx,
                loop_handle: tokio::sync::Mutex::new(None),
            }),
        })
    }
}
