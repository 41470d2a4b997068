//! Top-level bus error type

use crate::bus::BusState;
use crate::persistence::StoreError;
use crate::serializer::SerializationError;
use crate::transport::TransportError;
use crate::workflow::WorkflowError;

/// Errors surfaced by bus configuration and operation
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The same handler is already registered for this message name
    #[error("handler {handler_name} is already registered for message {message_name}")]
    HandlerAlreadyRegistered {
        /// Message name the duplicate was registered under
        message_name: String,
        /// Identity of the offending handler
        handler_name: String,
    },

    /// Lifecycle operation attempted from the wrong state
    #[error("cannot {operation} the bus while {state}")]
    InvalidStateTransition {
        /// The attempted operation
        operation: &'static str,
        /// The state the bus was in
        state: BusState,
    },

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Workflow persistence failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Workflow configuration failure
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}
