//! Task-local handler context frame
//!
//! Carries the correlation id and sticky attributes of the message being
//! handled, so every send/publish issued from within the handler — nested
//! calls included — inherits them without explicit threading.

use std::collections::HashMap;
use std::future::Future;

use serde_json::Value;

use courier_messages::MessageAttributes;

tokio::task_local! {
    static HANDLER_FRAME: HandlerFrame;
}

/// Ambient context of a handler invocation
#[derive(Debug, Clone, Default)]
pub(crate) struct HandlerFrame {
    correlation_id: Option<String>,
    sticky_attributes: HashMap<String, Value>,
}

impl HandlerFrame {
    /// Frame for handling a message with the given attributes
    pub(crate) fn for_message(attributes: &MessageAttributes) -> Self {
        Self {
            correlation_id: attributes.correlation_id.clone(),
            sticky_attributes: attributes.sticky_attributes.clone(),
        }
    }
}

/// Run a future with the given frame installed
pub(crate) async fn with_frame<F: Future>(frame: HandlerFrame, future: F) -> F::Output {
    HANDLER_FRAME.scope(frame, future).await
}

/// Merge the ambient frame into outgoing attributes
///
/// Explicitly supplied values win; the frame fills the correlation id when
/// absent and contributes sticky attributes not already set. Outside a
/// handler invocation the attributes pass through untouched.
pub(crate) fn resolve_attributes(mut attributes: MessageAttributes) -> MessageAttributes {
    let _ = HANDLER_FRAME.try_with(|frame| {
        if attributes.correlation_id.is_none() {
            attributes.correlation_id = frame.correlation_id.clone();
        }
        for (key, value) in &frame.sticky_attributes {
            attributes
                .sticky_attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    });
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_attributes_pass_through_outside_frame() {
        let attributes = MessageAttributes::new().with_correlation_id("c-1");
        let resolved = resolve_attributes(attributes.clone());
        assert_eq!(resolved, attributes);
    }

    #[tokio::test]
    async fn test_frame_fills_correlation_and_sticky() {
        let incoming = MessageAttributes::new()
            .with_correlation_id("c-1")
            .with_sticky_attribute("tenant", "acme");

        let resolved = with_frame(HandlerFrame::for_message(&incoming), async {
            resolve_attributes(MessageAttributes::default())
        })
        .await;

        assert_eq!(resolved.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(resolved.sticky_attributes["tenant"], json!("acme"));
    }

    #[tokio::test]
    async fn test_explicit_values_win() {
        let incoming = MessageAttributes::new()
            .with_correlation_id("c-1")
            .with_sticky_attribute("tenant", "acme");

        let resolved = with_frame(HandlerFrame::for_message(&incoming), async {
            resolve_attributes(
                MessageAttributes::new()
                    .with_correlation_id("c-2")
                    .with_sticky_attribute("tenant", "umbrella"),
            )
        })
        .await;

        assert_eq!(resolved.correlation_id.as_deref(), Some("c-2"));
        assert_eq!(resolved.sticky_attributes["tenant"], json!("umbrella"));
    }

    #[tokio::test]
    async fn test_frame_reaches_nested_calls() {
        async fn nested() -> MessageAttributes {
            resolve_attributes(MessageAttributes::default())
        }

        let incoming = MessageAttributes::new().with_sticky_attribute("request_id", "r-1");
        let resolved =
            with_frame(HandlerFrame::for_message(&incoming), async { nested().await }).await;

        assert_eq!(resolved.sticky_attributes["request_id"], json!("r-1"));
    }
}
