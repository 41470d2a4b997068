//! Metadata accompanying every message

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata carried alongside a message body.
///
/// `attributes` travel with this message only. `sticky_attributes` are
/// re-attached to every message subsequently sent or published from within
/// a handler invocation, so they flow down the causal chain of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageAttributes {
    /// Identifier tying together related messages.
    pub correlation_id: Option<String>,

    /// Attributes carried with this message only.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// Attributes propagated to every message sent from within a handler.
    #[serde(default)]
    pub sticky_attributes: HashMap<String, serde_json::Value>,
}

impl MessageAttributes {
    /// Create empty attributes
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a per-message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a sticky attribute
    pub fn with_sticky_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.sticky_attributes.insert(key.into(), value.into());
        self
    }

    /// True when no metadata is set
    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none() && self.attributes.is_empty() && self.sticky_attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let attributes = MessageAttributes::new()
            .with_correlation_id("order-123")
            .with_attribute("tenant", "acme")
            .with_sticky_attribute("request_id", "r-1");

        assert_eq!(attributes.correlation_id.as_deref(), Some("order-123"));
        assert_eq!(attributes.attributes["tenant"], "acme");
        assert_eq!(attributes.sticky_attributes["request_id"], "r-1");
        assert!(!attributes.is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(MessageAttributes::default().is_empty());
    }

    #[test]
    fn test_serialization_round_trip() {
        let attributes = MessageAttributes::new()
            .with_correlation_id("c-1")
            .with_sticky_attribute("k", 42);

        let json = serde_json::to_string(&attributes).unwrap();
        let parsed: MessageAttributes = serde_json::from_str(&json).unwrap();
        assert_eq!(attributes, parsed);
    }
}
