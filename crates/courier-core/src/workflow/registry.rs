//! Workflow registry
//!
//! Buffers workflow definitions during configuration and wires them into
//! the handler registry exactly once, at bus initialize. Wiring turns each
//! `starts_with` mapping into a handler that creates and persists a fresh
//! instance, and each `when` mapping into a handler that loads the
//! matching running instances and dispatches them through the step
//! dispatcher in parallel.

use std::any::type_name;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use futures::FutureExt;
use tracing::{debug, info, trace};

use crate::error::BusError;
use crate::handler::{HandlerContext, HandlerFn};
use crate::persistence::{StoreError, WorkflowStore};
use crate::registry::HandlerRegistry;
use crate::serializer::to_plain;

use super::definition::WorkflowDefinition;
use super::dispatcher::{dispatch_step, persist_outcome};
use super::state::{WorkflowInstance, WorkflowState};

/// Error type for workflow configuration failures
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Registration or re-initialization after initialize completed
    #[error("workflow registry is already initialized")]
    AlreadyInitialized,

    /// Two workflows share a name
    #[error("workflow {0} is already registered")]
    DuplicateWorkflow(String),

    /// A `when` mapping names a field the state does not serialize
    #[error("workflow {workflow} maps lookup to unknown state field {field}")]
    UnknownMappedField {
        /// The offending workflow
        workflow: String,
        /// The field named by `maps_to`
        field: String,
    },
}

/// Type-erased workflow definition, as buffered by the registry
trait AnyWorkflowDefinition: Send + Sync {
    /// Application-unique workflow name
    fn workflow_name(&self) -> &'static str;

    /// Name the state is stored under
    fn storage_name(&self) -> &'static str;

    /// Fields named by `when` mappings, deduplicated
    fn mapped_fields(&self) -> Vec<&'static str>;

    /// Wire the definition's handlers into the handler registry
    fn wire(
        &self,
        handlers: &mut HandlerRegistry,
        store: Arc<dyn WorkflowStore>,
    ) -> Result<(), BusError>;
}

impl<S: WorkflowState> AnyWorkflowDefinition for WorkflowDefinition<S> {
    fn workflow_name(&self) -> &'static str {
        self.workflow_name
    }

    fn storage_name(&self) -> &'static str {
        S::NAME
    }

    fn mapped_fields(&self) -> Vec<&'static str> {
        let mut fields: Vec<&'static str> =
            self.when_handlers.iter().map(|w| w.maps_to).collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    fn wire(
        &self,
        handlers: &mut HandlerRegistry,
        store: Arc<dyn WorkflowStore>,
    ) -> Result<(), BusError> {
        let default_fields = to_plain(&S::default()).map_err(BusError::Serialization)?;
        for when in &self.when_handlers {
            if default_fields.get(when.maps_to).is_none() {
                return Err(WorkflowError::UnknownMappedField {
                    workflow: self.workflow_name.to_string(),
                    field: when.maps_to.to_string(),
                }
                .into());
            }
        }

        for started in &self.started_by {
            let step = started.step.clone();
            let store = store.clone();
            let workflow_name = self.workflow_name;

            let handler: HandlerFn = Arc::new(move |ctx: HandlerContext| {
                let step = step.clone();
                let store = store.clone();
                async move {
                    let instance = WorkflowInstance::<S>::started();
                    debug!(
                        workflow = workflow_name,
                        workflow_id = %instance.workflow_id,
                        "starting workflow instance"
                    );
                    let snapshot = instance.state.clone();
                    let outcome = step(ctx.message, ctx.attributes, snapshot).await?;
                    persist_outcome(&store, instance, outcome).await
                }
                .boxed()
            });

            handlers.register_erased(
                started.message_name,
                type_name::<S>(),
                format!("workflow:{}/starts_with:{}", self.workflow_name, started.message_name),
                handler,
            )?;
        }

        for when in &self.when_handlers {
            let step = when.step.clone();
            let lookup = when.lookup.clone();
            let maps_to = when.maps_to;
            let store = store.clone();
            let workflow_name = self.workflow_name;

            let handler: HandlerFn = Arc::new(move |ctx: HandlerContext| {
                let step = step.clone();
                let lookup = lookup.clone();
                let store = store.clone();
                async move {
                    let key = lookup(&ctx.message, &ctx.attributes).filter(|k| !k.is_empty());
                    let Some(key) = key else {
                        trace!(
                            workflow = workflow_name,
                            "message carries no lookup key, ignoring"
                        );
                        return Ok(());
                    };

                    let rows = store.load(S::NAME, maps_to, &key, false).await?;
                    if rows.is_empty() {
                        trace!(
                            workflow = workflow_name,
                            lookup_key = %key,
                            "no running workflow instances match"
                        );
                        return Ok(());
                    }

                    let dispatches = rows.into_iter().map(|row| {
                        dispatch_step::<S>(&store, &step, &ctx.message, &ctx.attributes, row)
                    });
                    try_join_all(dispatches).await?;
                    Ok(())
                }
                .boxed()
            });

            handlers.register_erased(
                when.message_name,
                type_name::<S>(),
                format!("workflow:{}/when:{}", self.workflow_name, when.message_name),
                handler,
            )?;
        }

        Ok(())
    }
}

/// Registry of workflow definitions
#[derive(Default)]
pub struct WorkflowRegistry {
    buffered: Vec<Box<dyn AnyWorkflowDefinition>>,
    names: HashSet<String>,
    initialized: bool,
}

impl WorkflowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a workflow definition for wire-up at initialize
    pub fn register<S: WorkflowState>(
        &mut self,
        definition: WorkflowDefinition<S>,
    ) -> Result<(), WorkflowError> {
        if self.initialized {
            return Err(WorkflowError::AlreadyInitialized);
        }
        if !self.names.insert(definition.workflow_name().to_string()) {
            return Err(WorkflowError::DuplicateWorkflow(
                definition.workflow_name().to_string(),
            ));
        }
        self.buffered.push(Box::new(definition));
        Ok(())
    }

    /// Wire every buffered definition into the handler registry
    ///
    /// One-time: a second call fails. Requires persistence when any
    /// workflow is registered.
    pub(crate) async fn initialize(
        &mut self,
        handlers: &mut HandlerRegistry,
        store: Option<&Arc<dyn WorkflowStore>>,
    ) -> Result<(), BusError> {
        if self.initialized {
            return Err(WorkflowError::AlreadyInitialized.into());
        }

        if !self.buffered.is_empty() {
            let store = store.ok_or(StoreError::NotConfigured)?;
            for workflow in self.buffered.drain(..) {
                workflow.wire(handlers, store.clone())?;
                let fields = workflow.mapped_fields();
                store
                    .initialize_workflow(workflow.storage_name(), &fields)
                    .await?;
                info!(workflow = workflow.workflow_name(), "workflow initialized");
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Release persistence resources
    ///
    /// Swallows [`StoreError::NotConfigured`] — disposing a bus that never
    /// configured persistence is not an error. Every other failure
    /// propagates.
    pub(crate) async fn dispose(
        &self,
        store: Option<&Arc<dyn WorkflowStore>>,
    ) -> Result<(), BusError> {
        let Some(store) = store else {
            return Ok(());
        };
        match store.dispose().await {
            Err(StoreError::NotConfigured) => Ok(()),
            other => other.map_err(BusError::from),
        }
    }

    /// Whether initialize has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Names of registered workflows
    pub fn workflow_names(&self) -> Vec<&str> {
        self.names.iter().map(|n| n.as_str()).collect()
    }
}
