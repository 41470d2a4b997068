//! Declarative workflow definitions

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use courier_messages::{Message, MessageAttributes};

use crate::handler::HandlerError;
use crate::serializer::from_wire;

use super::state::WorkflowState;

/// Context passed to a workflow step
///
/// `state` is a defensive copy of the persisted instance: mutating it has
/// no effect unless it is handed back through the returned [`StepResult`].
#[derive(Debug, Clone)]
pub struct StepContext<M, S> {
    /// The decoded trigger message
    pub message: M,

    /// Attributes the message arrived with
    pub attributes: MessageAttributes,

    /// Snapshot of the workflow state
    pub state: S,
}

/// What a workflow step asks the engine to do with its output
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult<S> {
    /// No state change; nothing is persisted
    Noop,

    /// Persist the returned state as the next version
    Update(S),

    /// Persist the returned state and mark the instance complete
    Complete(S),

    /// Drop the step's output without persisting
    Discard,
}

/// Type-erased step: wire body + attributes + state snapshot in,
/// step result out
pub(crate) type StepFn<S> = Arc<
    dyn Fn(Value, MessageAttributes, S) -> BoxFuture<'static, Result<StepResult<S>, HandlerError>>
        + Send
        + Sync,
>;

/// Type-erased lookup: extracts the scalar key a message addresses
pub(crate) type LookupFn =
    Arc<dyn Fn(&Value, &MessageAttributes) -> Option<String> + Send + Sync>;

pub(crate) struct StartedByHandler<S> {
    pub message_name: &'static str,
    pub step: StepFn<S>,
}

pub(crate) struct WhenHandler<S> {
    pub message_name: &'static str,
    pub step: StepFn<S>,
    pub lookup: LookupFn,
    pub maps_to: &'static str,
}

/// Declarative mapping from messages to workflow steps
///
/// Immutable once registered with the bus. `starts_with` messages create
/// new instances; `when` messages advance the running instances whose
/// `maps_to` field equals the key the lookup extracts.
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowDefinition::<OrderFulfillment>::new("order-fulfillment")
///     .starts_with(|ctx: StepContext<OrderPlaced, _>| async move {
///         let mut state = ctx.state;
///         state.order_id = ctx.message.order_id;
///         Ok(StepResult::Update(state))
///     })
///     .when(
///         |ctx: StepContext<PaymentReceived, _>| async move {
///             let mut state = ctx.state;
///             state.paid = true;
///             Ok(StepResult::Complete(state))
///         },
///         |message: &PaymentReceived, _| Some(message.order_id.clone()),
///         "order_id",
///     );
/// ```
pub struct WorkflowDefinition<S: WorkflowState> {
    pub(crate) workflow_name: &'static str,
    pub(crate) started_by: Vec<StartedByHandler<S>>,
    pub(crate) when_handlers: Vec<WhenHandler<S>>,
}

impl<S: WorkflowState> WorkflowDefinition<S> {
    /// Create an empty definition
    ///
    /// `workflow_name` must be unique across the application.
    pub fn new(workflow_name: &'static str) -> Self {
        Self {
            workflow_name,
            started_by: Vec::new(),
            when_handlers: Vec::new(),
        }
    }

    /// The workflow's unique name
    pub fn workflow_name(&self) -> &'static str {
        self.workflow_name
    }

    /// Map a trigger message to an initializer step
    ///
    /// The step receives a frozen fresh instance (new id, running,
    /// version 0); a non-nil result is persisted at version 1.
    pub fn starts_with<M, F, Fut>(mut self, step: F) -> Self
    where
        M: Message,
        F: Fn(StepContext<M, S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepResult<S>, HandlerError>> + Send + 'static,
    {
        self.started_by.push(StartedByHandler {
            message_name: M::NAME,
            step: erase_step(step),
        });
        self
    }

    /// Map a message to a step advancing existing instances
    ///
    /// `lookup` must be pure: it extracts the scalar key from the message
    /// and its attributes. `maps_to` names the serialized state field the
    /// key is matched against; running instances whose field equals the
    /// key are each dispatched through the step.
    pub fn when<M, F, Fut, L>(mut self, step: F, lookup: L, maps_to: &'static str) -> Self
    where
        M: Message,
        F: Fn(StepContext<M, S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepResult<S>, HandlerError>> + Send + 'static,
        L: Fn(&M, &MessageAttributes) -> Option<String> + Send + Sync + 'static,
    {
        let lookup: LookupFn = Arc::new(move |body: &Value, attributes: &MessageAttributes| {
            from_wire::<M>(body.clone())
                .ok()
                .and_then(|message| lookup(&message, attributes))
        });

        self.when_handlers.push(WhenHandler {
            message_name: M::NAME,
            step: erase_step(step),
            lookup,
            maps_to,
        });
        self
    }
}

fn erase_step<M, S, F, Fut>(step: F) -> StepFn<S>
where
    M: Message,
    S: WorkflowState,
    F: Fn(StepContext<M, S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepResult<S>, HandlerError>> + Send + 'static,
{
    Arc::new(move |body: Value, attributes: MessageAttributes, state: S| {
        match from_wire::<M>(body) {
            Ok(message) => step(StepContext {
                message,
                attributes,
                state,
            })
            .boxed(),
            Err(error) => futures::future::ready(Err(HandlerError::from(error))).boxed(),
        }
    })
}
