//! Workflow engine
//!
//! This module contains the workflow ("saga") primitives:
//! - [`WorkflowState`] trait and [`WorkflowInstance`] persistent envelope
//! - [`WorkflowDefinition`] — declarative mapping of trigger messages to
//!   initializer steps and of subsequent messages to lookup + step pairs
//! - [`WorkflowRegistry`] — buffers definitions and wires them into the
//!   handler registry at bus initialize
//! - the step dispatcher — snapshot state, invoke the step, persist the
//!   result with optimistic concurrency

mod definition;
mod dispatcher;
mod registry;
mod state;

pub use definition::{StepContext, StepResult, WorkflowDefinition};
pub use registry::{WorkflowError, WorkflowRegistry};
pub use state::{
    WorkflowInstance, WorkflowState, WorkflowStatus, STATUS_FIELD, WORKFLOW_ID_FIELD,
};
