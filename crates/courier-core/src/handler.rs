//! Handler types
//!
//! A handler is an async function taking a context with the decoded
//! message and its attributes. Typed handlers are erased into [`HandlerFn`]
//! at registration; the erased form re-decodes the message per invocation
//! so the registry can stay name-keyed.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use courier_messages::{Message, MessageAttributes};

use crate::bus::BusClient;
use crate::error::BusError;
use crate::persistence::StoreError;
use crate::serializer::{from_wire, SerializationError};

/// Error type for handler failures
///
/// Any failure causes the message to be returned to the transport for
/// redelivery; every kind except an optimistic-concurrency conflict also
/// fires the `error` hook.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message could not be decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Workflow persistence failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A nested bus operation failed
    #[error("bus error: {0}")]
    Bus(#[from] Box<BusError>),

    /// Application-level failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Application error from a message
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!("{message}"))
    }

    /// True when the failure is a stale optimistic save
    ///
    /// These return the message for redelivery without firing the error
    /// hook; re-running the step against current state is the recovery.
    pub fn is_optimistic_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::WorkflowStateNotFound { .. })
        )
    }
}

impl From<BusError> for HandlerError {
    fn from(error: BusError) -> Self {
        Self::Bus(Box::new(error))
    }
}

/// Context passed to a typed handler
#[derive(Debug, Clone)]
pub struct Handling<M> {
    /// The decoded message
    pub message: M,

    /// Attributes it arrived with
    pub attributes: MessageAttributes,

    /// Handle for nested send/publish; inherits the ambient context frame
    pub bus: BusClient,
}

/// Context passed to an erased handler
#[derive(Clone)]
pub struct HandlerContext {
    /// Wire document of the message, `$name` included
    pub message: Value,

    /// Attributes it arrived with
    pub attributes: MessageAttributes,

    /// Handle for nested send/publish
    pub bus: BusClient,
}

/// Type-erased handler function
pub type HandlerFn =
    Arc<dyn Fn(HandlerContext) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Erase a typed handler into [`HandlerFn`] form
pub(crate) fn erase_handler<M, F, Fut>(handler: F) -> HandlerFn
where
    M: Message,
    F: Fn(Handling<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |ctx: HandlerContext| match from_wire::<M>(ctx.message) {
        Ok(message) => handler(Handling {
            message,
            attributes: ctx.attributes,
            bus: ctx.bus,
        })
        .boxed(),
        Err(error) => futures::future::ready(Err(HandlerError::from(error))).boxed(),
    })
}
