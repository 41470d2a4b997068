//! Transport layer
//!
//! This module provides:
//! - [`Transport`] trait — the abstract queue the bus runs against
//! - [`MemoryTransport`] — in-process reference implementation for tests
//!   and prototyping
//!
//! The transport owns delivery semantics: visibility of returned messages,
//! retry counting, and terminal dead-letter policy. The bus core only
//! distinguishes success (delete) from failure (return).

mod memory;

use async_trait::async_trait;
use courier_messages::MessageAttributes;

pub use memory::{DeadLetteredMessage, MemoryEnvelope, MemoryTransport, MemoryTransportConfig};

/// Error type for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to enqueue a message
    #[error("failed to enqueue message: {0}")]
    Enqueue(String),

    /// Failed to read from the queue
    #[error("failed to read message: {0}")]
    Read(String),

    /// Failed to acknowledge a handled message
    #[error("failed to delete message: {0}")]
    Delete(String),

    /// Failed to return a message to the queue
    #[error("failed to return message: {0}")]
    Return(String),

    /// Operation attempted while the transport is not running
    #[error("transport is not running")]
    NotRunning,
}

/// A serialized message on its way out to the transport
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Message name (routing discriminator)
    pub name: String,

    /// Serialized body, `$name` included
    pub body: String,

    /// Resolved attributes (ambient sticky attributes already merged)
    pub attributes: MessageAttributes,
}

/// A message leased from the transport for processing
///
/// The pair of the serialized domain message and the transport-specific
/// envelope `E`. Its lifetime is bounded by the in-flight lease: exactly
/// one of [`Transport::delete_message`] or [`Transport::return_message`]
/// must consume it.
#[derive(Debug)]
pub struct TransportMessage<E> {
    /// Transport-assigned message id, when the transport has one
    pub id: Option<String>,

    /// Serialized domain message as read off the wire
    pub body: String,

    /// Attributes carried with the message
    pub attributes: MessageAttributes,

    /// How many times this message has been received (1-based)
    pub seen_count: u32,

    /// Transport-specific envelope (receipt handle etc.)
    pub raw: E,
}

/// Abstract queue underneath the bus
///
/// Implementations must be thread-safe; the dispatch loop calls
/// `read_next_message` from a single task but `publish`/`send` may be
/// invoked from any number of handler tasks concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transport-specific message envelope
    type Envelope: Send + Sync + 'static;

    /// Enqueue an event for all subscribers
    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError>;

    /// Enqueue a command for its handler
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError>;

    /// Read the next message, waiting a bounded interval
    ///
    /// Returns `Ok(None)` when nothing arrived within the transport's
    /// receive window; the dispatch loop yields and retries.
    async fn read_next_message(
        &self,
    ) -> Result<Option<TransportMessage<Self::Envelope>>, TransportError>;

    /// Acknowledge successful processing
    async fn delete_message(
        &self,
        message: TransportMessage<Self::Envelope>,
    ) -> Result<(), TransportError>;

    /// Release a message back to the queue for redelivery
    async fn return_message(
        &self,
        message: TransportMessage<Self::Envelope>,
    ) -> Result<(), TransportError>;

    /// Lifecycle hook paralleling the bus start
    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Lifecycle hook paralleling the bus stop
    async fn stop(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Object-safe send/publish surface of a transport
///
/// The bus hands this to handlers (via `BusClient`) so nested sends do not
/// need to know the concrete transport type.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Enqueue a command
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError>;

    /// Enqueue an event
    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport> MessageSender for T {
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        Transport::send(self, message).await
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        Transport::publish(self, message).await
    }
}
