//! Message trait definitions

use serde::{de::DeserializeOwned, Serialize};

/// Field injected into every wire body to carry the message name.
///
/// External messages (not authored against this bus) may lack it; they are
/// routable only through predicate resolvers.
pub const NAME_FIELD: &str = "$name";

/// A bus message.
///
/// The associated `NAME` is the externally visible discriminator used for
/// routing and must be unique across the application. Convention is a
/// reverse-domain style name, e.g. `"orders/order-placed"`.
///
/// # Example
///
/// ```
/// use courier_messages::{Event, Message};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: String,
/// }
///
/// impl Message for OrderPlaced {
///     const NAME: &'static str = "orders/order-placed";
/// }
///
/// impl Event for OrderPlaced {}
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Unique name identifying this message type on the wire.
    const NAME: &'static str;
}

/// A message addressed point-to-point, dispatched via `send`.
pub trait Command: Message {}

/// A message broadcast to all subscribers, dispatched via `publish`.
pub trait Event: Message {}
