//! Message serialization
//!
//! The bus works with JSON documents internally; the [`Serializer`] trait
//! covers the string ↔ document boundary so a replacement wire format can
//! be dropped in. Typed conversion on top of the document form goes through
//! [`to_plain`] / [`to_class`], which must stay symmetric.

use courier_messages::{Message, NAME_FIELD};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Error type for serialization failures
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// Failed to encode a value
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Failed to decode a value
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Messages must serialize to JSON objects so `$name` can be injected
    #[error("message body is not a JSON object")]
    NotAnObject,
}

/// String ↔ document conversion at the transport boundary.
///
/// Implementations must be symmetric: `deserialize(serialize(x)) == x`.
pub trait Serializer: Send + Sync + 'static {
    /// Encode a message document into its wire string form
    fn serialize(&self, body: &Value) -> Result<String, SerializationError>;

    /// Decode a wire string into a message document
    fn deserialize(&self, raw: &str) -> Result<Value, SerializationError>;
}

/// The default JSON serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, body: &Value) -> Result<String, SerializationError> {
        serde_json::to_string(body).map_err(SerializationError::Encode)
    }

    fn deserialize(&self, raw: &str) -> Result<Value, SerializationError> {
        serde_json::from_str(raw).map_err(SerializationError::Decode)
    }
}

/// Convert a typed value to its plain document form
pub fn to_plain<T: Serialize>(value: &T) -> Result<Value, SerializationError> {
    serde_json::to_value(value).map_err(SerializationError::Encode)
}

/// Convert a plain document back into a typed value
///
/// Symmetric with [`to_plain`]: `to_class(to_plain(x)) == x`.
pub fn to_class<T: DeserializeOwned>(plain: Value) -> Result<T, SerializationError> {
    serde_json::from_value(plain).map_err(SerializationError::Decode)
}

/// Encode a message into its wire document, injecting the `$name` field
pub fn to_wire<M: Message>(message: &M) -> Result<Value, SerializationError> {
    let mut body = to_plain(message)?;
    let Value::Object(map) = &mut body else {
        return Err(SerializationError::NotAnObject);
    };
    map.insert(NAME_FIELD.to_string(), Value::String(M::NAME.to_string()));
    Ok(body)
}

/// Decode a typed message from a wire document, stripping the `$name` field
pub fn from_wire<M: Message>(mut body: Value) -> Result<M, SerializationError> {
    if let Value::Object(map) = &mut body {
        map.remove(NAME_FIELD);
    }
    to_class(body)
}

/// Read the `$name` discriminator off a wire document, if present
pub fn wire_name(body: &Value) -> Option<&str> {
    body.get(NAME_FIELD)?.as_str()
}
