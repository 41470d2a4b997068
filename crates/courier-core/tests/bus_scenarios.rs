//! End-to-end bus scenarios over the in-memory transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use courier_core::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestEvent {
    order_id: String,
}

impl Message for TestEvent {
    const NAME: &'static str = "test/test-event";
}

impl Event for TestEvent {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestCommand {
    order_id: String,
}

impl Message for TestCommand {
    const NAME: &'static str = "test/test-command";
}

impl Command for TestCommand {}

fn test_event() -> TestEvent {
    TestEvent {
        order_id: "o-1".to_string(),
    }
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {description}");
}

#[tokio::test]
async fn started_state_round_trip() {
    let transport = MemoryTransport::default();
    let bus = Bus::configure()
        .with_transport(transport)
        .with_handler(|_h: Handling<TestEvent>| async { Ok(()) })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    assert_eq!(bus.state(), BusState::Initialized);

    bus.start().await.unwrap();
    assert_eq!(bus.state(), BusState::Started);

    bus.stop().await.unwrap();
    assert_eq!(bus.state(), BusState::Stopped);
}

#[tokio::test]
async fn double_start_fails() {
    let bus = Bus::configure()
        .with_transport(MemoryTransport::default())
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    let second = bus.start().await;
    assert!(matches!(
        second,
        Err(BusError::InvalidStateTransition {
            operation: "start",
            ..
        })
    ));

    bus.stop().await.unwrap();

    // Stopped -> Started is a legal restart
    bus.start().await.unwrap();
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn stop_when_not_started_fails() {
    let bus = Bus::configure()
        .with_transport(MemoryTransport::default())
        .initialize()
        .await
        .unwrap();

    assert!(matches!(
        bus.stop().await,
        Err(BusError::InvalidStateTransition {
            operation: "stop",
            ..
        })
    ));
}

#[tokio::test]
async fn successful_handle_deletes_message() {
    let transport = MemoryTransport::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_handler(move |_h: Handling<TestEvent>| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    bus.publish(&test_event()).await.unwrap();

    wait_until("message handled", || {
        calls.load(Ordering::SeqCst) == 1 && transport.depth() == 0 && transport.in_flight_count() == 0
    })
    .await;

    // Exactly once
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    bus.stop().await.unwrap();
}

#[tokio::test]
async fn handler_failure_retries_message() {
    let transport = MemoryTransport::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_handler(move |_h: Handling<TestEvent>| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HandlerError::msg("first attempt fails"))
                } else {
                    Ok(())
                }
            }
        })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    bus.publish(&test_event()).await.unwrap();

    wait_until("message retried to success", || {
        calls.load(Ordering::SeqCst) == 2 && transport.depth() == 0 && transport.in_flight_count() == 0
    })
    .await;

    bus.stop().await.unwrap();
    assert_eq!(transport.dead_letter_count(), 0);
}

#[tokio::test]
async fn error_hook_fires_with_failure_details() {
    let transport = MemoryTransport::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_handler(move |_h: Handling<TestEvent>| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HandlerError::msg("boom"))
                } else {
                    Ok(())
                }
            }
        })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    #[derive(Debug)]
    struct SeenFailure {
        name: Option<String>,
        order_id: serde_json::Value,
        attributes: MessageAttributes,
        message_id: Option<String>,
        seen_count: u32,
    }

    let failures: Arc<Mutex<Vec<SeenFailure>>> = Arc::new(Mutex::new(Vec::new()));
    let f = failures.clone();
    bus.on_error(move |failed: &FailedMessage<'_>| {
        f.lock().push(SeenFailure {
            name: failed.name.map(str::to_string),
            order_id: failed.body["order_id"].clone(),
            attributes: failed.attributes.clone(),
            message_id: failed.message_id.map(str::to_string),
            seen_count: failed.seen_count,
        });
    });

    bus.start().await.unwrap();
    bus.publish_with(
        &test_event(),
        MessageAttributes::new()
            .with_correlation_id("corr-1")
            .with_attribute("tenant", "acme")
            .with_sticky_attribute("request_id", "r-1"),
    )
    .await
    .unwrap();

    wait_until("failure then recovery", || {
        calls.load(Ordering::SeqCst) == 2 && transport.depth() == 0
    })
    .await;
    bus.stop().await.unwrap();

    let failures = failures.lock();
    assert_eq!(failures.len(), 1, "error hook fires once: {failures:?}");
    let failure = &failures[0];
    assert_eq!(failure.name.as_deref(), Some(TestEvent::NAME));
    assert_eq!(failure.order_id, "o-1");
    assert_eq!(failure.attributes.correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(failure.attributes.attributes["tenant"], "acme");
    assert_eq!(failure.attributes.sticky_attributes["request_id"], "r-1");
    assert!(failure.message_id.is_some());
    assert_eq!(failure.seen_count, 1);
}

#[tokio::test]
async fn send_hook_scoping() {
    let bus = Bus::configure()
        .with_transport(MemoryTransport::default())
        .initialize()
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let hook = bus.on_send(move |name, _body, attributes| {
        s.lock()
            .push((name.to_string(), attributes.correlation_id.clone()));
    });

    let command = TestCommand {
        order_id: "o-1".to_string(),
    };
    let attributes = MessageAttributes::new().with_correlation_id("a");

    bus.send_with(&command, attributes.clone()).await.unwrap();
    assert!(bus.off(hook));
    bus.send_with(&command, attributes).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, TestCommand::NAME);
    assert_eq!(seen[0].1.as_deref(), Some("a"));
}

#[tokio::test]
async fn publish_hook_fires_before_transport() {
    let transport = MemoryTransport::default();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .initialize()
        .await
        .unwrap();

    let depth_at_hook = Arc::new(AtomicUsize::new(usize::MAX));
    let d = depth_at_hook.clone();
    let t = transport.clone();
    bus.on_publish(move |_name, _body, _attributes| {
        d.store(t.depth(), Ordering::SeqCst);
    });

    bus.publish(&test_event()).await.unwrap();
    assert_eq!(depth_at_hook.load(Ordering::SeqCst), 0);
    assert_eq!(transport.depth(), 1);
}

#[tokio::test]
async fn sticky_attributes_propagate_to_nested_sends() {
    let transport = MemoryTransport::default();

    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_handler(move |h: Handling<TestEvent>| async move {
            // No explicit attributes: everything must come from the frame
            h.bus
                .send(&TestCommand {
                    order_id: h.message.order_id,
                })
                .await?;
            Ok(())
        })
        .unwrap()
        .with_handler(|_h: Handling<TestCommand>| async { Ok(()) })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    let sent: Arc<Mutex<Vec<MessageAttributes>>> = Arc::new(Mutex::new(Vec::new()));
    let s = sent.clone();
    bus.on_send(move |_name, _body, attributes| {
        s.lock().push(attributes.clone());
    });

    bus.start().await.unwrap();
    bus.publish_with(
        &test_event(),
        MessageAttributes::new()
            .with_correlation_id("corr-9")
            .with_sticky_attribute("request_id", "r-9"),
    )
    .await
    .unwrap();

    wait_until("nested send observed", || !sent.lock().is_empty()).await;
    wait_until("queue drained", || {
        transport.depth() == 0 && transport.in_flight_count() == 0
    })
    .await;
    bus.stop().await.unwrap();

    let sent = sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].correlation_id.as_deref(), Some("corr-9"));
    assert_eq!(sent[0].sticky_attributes["request_id"], "r-9");
}

#[tokio::test]
async fn unhandled_message_is_deleted() {
    let transport = MemoryTransport::default();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    // Publish through a shared client handle rather than the bus itself
    bus.client().publish(&test_event()).await.unwrap();

    wait_until("unhandled message deleted", || {
        transport.depth() == 0 && transport.in_flight_count() == 0
    })
    .await;
    bus.stop().await.unwrap();
    assert_eq!(transport.dead_letter_count(), 0);
}

#[tokio::test]
async fn failing_handler_exhausts_to_dead_letter() {
    let transport =
        MemoryTransport::new(MemoryTransportConfig::new().with_max_retries(3));

    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_handler(|_h: Handling<TestEvent>| async {
            Err(HandlerError::msg("always fails"))
        })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    bus.publish(&test_event()).await.unwrap();

    wait_until("message dead-lettered", || transport.dead_letter_count() == 1).await;
    bus.stop().await.unwrap();

    assert_eq!(transport.depth(), 0);
    assert_eq!(transport.dead_letter_names(), vec![TestEvent::NAME.to_string()]);
}

#[tokio::test]
async fn resolver_routes_external_message() {
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ExternalPing {
        ping_id: String,
    }

    impl Message for ExternalPing {
        const NAME: &'static str = "external/ping";
    }

    let transport = MemoryTransport::default();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_resolver(
            |body: &serde_json::Value| body.get("ping_id").is_some(),
            Some("external-topic".to_string()),
            move |h: Handling<ExternalPing>| {
                let s = s.clone();
                async move {
                    s.lock().push(h.message.ping_id);
                    Ok(())
                }
            },
        )
        .unwrap()
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();

    // Arrives straight off the transport with no `$name` discriminator,
    // the way a message authored outside this bus would
    transport
        .send(OutgoingMessage {
            name: "external".to_string(),
            body: r#"{"ping_id":"p-1"}"#.to_string(),
            attributes: MessageAttributes::default(),
        })
        .await
        .unwrap();

    wait_until("external message routed", || seen.lock().len() == 1).await;
    wait_until("queue drained", || {
        transport.depth() == 0 && transport.in_flight_count() == 0
    })
    .await;
    bus.stop().await.unwrap();

    assert_eq!(*seen.lock(), vec!["p-1".to_string()]);
}

#[tokio::test]
async fn custom_serializer_carries_messages() {
    /// JSON with indentation; decode side is shared
    #[derive(Debug, Clone, Copy, Default)]
    struct PrettyJsonSerializer;

    impl Serializer for PrettyJsonSerializer {
        fn serialize(&self, body: &serde_json::Value) -> Result<String, SerializationError> {
            serde_json::to_string_pretty(body).map_err(SerializationError::Encode)
        }

        fn deserialize(&self, raw: &str) -> Result<serde_json::Value, SerializationError> {
            serde_json::from_str(raw).map_err(SerializationError::Decode)
        }
    }

    let transport = MemoryTransport::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_serializer(PrettyJsonSerializer)
        .with_handler(move |h: Handling<TestEvent>| {
            let c = c.clone();
            async move {
                assert_eq!(h.message.order_id, "o-1");
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    bus.publish(&test_event()).await.unwrap();

    wait_until("message handled through custom serializer", || {
        calls.load(Ordering::SeqCst) == 1 && transport.depth() == 0
    })
    .await;
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn stop_drains_in_flight_handlers() {
    let transport = MemoryTransport::default();
    let finished = Arc::new(AtomicUsize::new(0));

    let f = finished.clone();
    let bus = Bus::configure()
        .with_transport(transport.clone())
        .with_handler(move |_h: Handling<TestEvent>| {
            let f = f.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap()
        .initialize()
        .await
        .unwrap();

    bus.start().await.unwrap();
    bus.publish(&test_event()).await.unwrap();

    // Give the loop a moment to lease the message, then stop mid-handle
    wait_until("message leased", || transport.in_flight_count() == 1).await;
    bus.stop().await.unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 1, "stop waited for the handler");
}
