//! Workflow step dispatcher
//!
//! Runs a user step against an immutable snapshot of a loaded instance
//! and persists the result. Optimistic concurrency is the only
//! coordination: the save is predicated on the version the row was loaded
//! at, and a conflict propagates so the message is redelivered and the
//! step re-runs against current state.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace, warn};

use courier_messages::MessageAttributes;

use crate::handler::HandlerError;
use crate::persistence::{StoredWorkflowRow, WorkflowStore};

use super::definition::{StepFn, StepResult};
use super::state::{WorkflowInstance, WorkflowState, WorkflowStatus};

/// Dispatch one loaded instance through a step
pub(crate) async fn dispatch_step<S: WorkflowState>(
    store: &Arc<dyn WorkflowStore>,
    step: &StepFn<S>,
    body: &Value,
    attributes: &MessageAttributes,
    row: StoredWorkflowRow,
) -> Result<(), HandlerError> {
    let instance = WorkflowInstance::<S>::from_row(row)?;
    let snapshot = instance.state.clone();
    let outcome = step(body.clone(), attributes.clone(), snapshot).await?;
    persist_outcome(store, instance, outcome).await
}

/// Apply a step result to the instance it ran against
pub(crate) async fn persist_outcome<S: WorkflowState>(
    store: &Arc<dyn WorkflowStore>,
    instance: WorkflowInstance<S>,
    outcome: StepResult<S>,
) -> Result<(), HandlerError> {
    match outcome {
        StepResult::Noop => {
            trace!(
                workflow = S::NAME,
                workflow_id = %instance.workflow_id,
                "step produced no state changes"
            );
            Ok(())
        }
        StepResult::Discard => {
            debug!(
                workflow = S::NAME,
                workflow_id = %instance.workflow_id,
                "step discarded its state changes"
            );
            Ok(())
        }
        StepResult::Update(state) => {
            persist(store, instance, state, WorkflowStatus::Running).await
        }
        StepResult::Complete(state) => {
            persist(store, instance, state, WorkflowStatus::Complete).await
        }
    }
}

async fn persist<S: WorkflowState>(
    store: &Arc<dyn WorkflowStore>,
    instance: WorkflowInstance<S>,
    state: S,
    status: WorkflowStatus,
) -> Result<(), HandlerError> {
    let next = WorkflowInstance {
        workflow_id: instance.workflow_id,
        version: instance.version,
        status,
        state,
    };
    let row = next.to_row()?;

    debug!(
        workflow = S::NAME,
        workflow_id = %next.workflow_id,
        from_version = next.version,
        %status,
        "persisting workflow state"
    );

    if let Err(error) = store.save(S::NAME, row).await {
        warn!(
            workflow = S::NAME,
            workflow_id = %next.workflow_id,
            %error,
            "failed to persist workflow state"
        );
        return Err(error.into());
    }
    Ok(())
}
