//! # Courier Service Bus
//!
//! A transport-agnostic message bus with long-running persistent workflows.
//!
//! ## Features
//!
//! - **Publish/send/subscribe**: application code works with typed commands
//!   and events; the transport behind the bus is pluggable
//! - **At-least-once dispatch**: failed handlers return the message to the
//!   transport, which owns the retry and dead-letter policy
//! - **Workflows**: declarative, persistent state machines advanced by
//!   messages, with optimistic concurrency as the only coordination
//! - **Hooks**: observer surface for `send`, `publish`, and `error`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Transport                             │
//! │  (in-memory queue here; Redis/SQS/... behind the same trait)│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Bus dispatch loop                        │
//! │  (decode, resolve handlers, context frame, ack or return)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Handler registry / workflow steps                 │
//! │  (plain handlers, or state load → step → optimistic save)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use courier_core::prelude::*;
//!
//! let transport = MemoryTransport::default();
//! let bus = Bus::configure()
//!     .with_transport(transport)
//!     .with_handler(|h: Handling<OrderPlaced>| async move {
//!         h.bus.publish(&OrderAccepted { order_id: h.message.order_id }).await?;
//!         Ok(())
//!     })?
//!     .initialize()
//!     .await?;
//!
//! bus.start().await?;
//! bus.publish(&OrderPlaced { order_id: "o-1".into() }).await?;
//! ```

pub mod bus;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod persistence;
pub mod registry;
pub mod serializer;
pub mod transport;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::bus::{Bus, BusBuilder, BusClient, BusState};
    pub use crate::error::BusError;
    pub use crate::handler::{HandlerError, Handling};
    pub use crate::hooks::{FailedMessage, HookId};
    pub use crate::persistence::{InMemoryWorkflowStore, StoreError, StoredWorkflowRow, WorkflowStore};
    pub use crate::serializer::{JsonSerializer, SerializationError, Serializer};
    pub use crate::transport::{
        MemoryTransport, MemoryTransportConfig, OutgoingMessage, Transport, TransportMessage,
    };
    pub use crate::workflow::{
        StepContext, StepResult, WorkflowDefinition, WorkflowInstance, WorkflowState, WorkflowStatus,
    };
    pub use courier_messages::{Command, Event, Message, MessageAttributes};
}

// Re-export the message contract crate at the root
pub use courier_messages::{Command, Event, Message, MessageAttributes, NAME_FIELD};

pub use bus::{Bus, BusBuilder, BusClient, BusState};
pub use error::BusError;
pub use handler::{HandlerError, Handling};
pub use hooks::{FailedMessage, HookId};
pub use persistence::{InMemoryWorkflowStore, StoreError, StoredWorkflowRow, WorkflowStore};
pub use serializer::{JsonSerializer, SerializationError, Serializer};
pub use transport::{
    MemoryTransport, MemoryTransportConfig, OutgoingMessage, Transport, TransportMessage,
};
pub use workflow::{
    StepContext, StepResult, WorkflowDefinition, WorkflowInstance, WorkflowState, WorkflowStatus,
};
