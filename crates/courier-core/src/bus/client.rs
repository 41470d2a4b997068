//! Bus client handle
//!
//! The cheaply-cloneable send/publish surface of the bus. Handlers receive
//! one in their context so nested sends do not need the concrete bus type;
//! the ambient handler frame supplies correlation and sticky attributes.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use courier_messages::{Command, Event, Message, MessageAttributes};

use crate::error::BusError;
use crate::hooks::HookRegistry;
use crate::serializer::{to_wire, Serializer};
use crate::transport::{MessageSender, OutgoingMessage};

use super::frame::resolve_attributes;

#[derive(Clone, Copy)]
enum Outbound {
    Send,
    Publish,
}

/// Handle for publishing events and sending commands
///
/// Clones share the underlying transport, serializer, and hook registry.
#[derive(Clone)]
pub struct BusClient {
    sender: Arc<dyn MessageSender>,
    serializer: Arc<dyn Serializer>,
    hooks: Arc<HookRegistry>,
}

impl BusClient {
    pub(crate) fn new(
        sender: Arc<dyn MessageSender>,
        serializer: Arc<dyn Serializer>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            sender,
            serializer,
            hooks,
        }
    }

    /// Publish an event with empty attributes
    pub async fn publish<E: Event>(&self, event: &E) -> Result<(), BusError> {
        self.publish_with(event, MessageAttributes::default()).await
    }

    /// Publish an event with attributes
    pub async fn publish_with<E: Event>(
        &self,
        event: &E,
        attributes: MessageAttributes,
    ) -> Result<(), BusError> {
        let body = to_wire(event)?;
        self.dispatch(Outbound::Publish, E::NAME, body, attributes)
            .await
    }

    /// Send a command with empty attributes
    pub async fn send<C: Command>(&self, command: &C) -> Result<(), BusError> {
        self.send_with(command, MessageAttributes::default()).await
    }

    /// Send a command with attributes
    pub async fn send_with<C: Command>(
        &self,
        command: &C,
        attributes: MessageAttributes,
    ) -> Result<(), BusError> {
        let body = to_wire(command)?;
        self.dispatch(Outbound::Send, C::NAME, body, attributes)
            .await
    }

    #[tracing::instrument(skip(self, direction, body, attributes))]
    async fn dispatch(
        &self,
        direction: Outbound,
        name: &str,
        body: Value,
        attributes: MessageAttributes,
    ) -> Result<(), BusError> {
        let attributes = resolve_attributes(attributes);

        // Hooks fire synchronously, before the transport call
        match direction {
            Outbound::Send => self.hooks.emit_send(name, &body, &attributes),
            Outbound::Publish => self.hooks.emit_publish(name, &body, &attributes),
        }

        let raw = self.serializer.serialize(&body)?;
        let message = OutgoingMessage {
            name: name.to_string(),
            body: raw,
            attributes,
        };

        match direction {
            Outbound::Send => self.sender.send(message).await?,
            Outbound::Publish => self.sender.publish(message).await?,
        }
        Ok(())
    }
}

impl fmt::Debug for BusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusClient").finish_non_exhaustive()
    }
}
