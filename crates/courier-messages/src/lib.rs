//! Message contracts for the Courier service bus.
//!
//! Applications define their messages as plain serde types implementing
//! [`Command`] (point-to-point, one intended handler) or [`Event`]
//! (broadcast, any number of handlers). Both are [`Message`]s and the
//! dispatch core treats them identically; the split only gates which bus
//! entry point (`send` vs `publish`) accepts them.
//!
//! Every message travels with [`MessageAttributes`]: a correlation id,
//! per-message attributes, and sticky attributes that propagate to every
//! message sent from within a handler invocation.

mod attributes;
mod message;

pub use attributes::MessageAttributes;
pub use message::{Command, Event, Message, NAME_FIELD};
