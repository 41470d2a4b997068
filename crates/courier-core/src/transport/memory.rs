//! In-memory transport for testing and prototyping
//!
//! Provides the same delivery semantics as a real queue: in-flight leases,
//! seen counts, redelivery on return, and a dead-letter queue once a
//! message exhausts its retries. Non-durable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use courier_messages::MessageAttributes;

use super::{OutgoingMessage, Transport, TransportError, TransportMessage};
use async_trait::async_trait;

/// Memory transport configuration
#[derive(Debug, Clone)]
pub struct MemoryTransportConfig {
    /// Bounded wait inside `read_next_message`
    pub receive_timeout: Duration,

    /// Deliveries after which a returned message is dead-lettered
    pub max_retries: u32,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(100),
            max_retries: 10,
        }
    }
}

impl MemoryTransportConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounded receive wait
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the delivery limit before dead-lettering
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

/// A message sitting in the queue or held in flight
#[derive(Debug, Clone)]
struct QueuedMessage {
    id: Uuid,
    name: String,
    body: String,
    attributes: MessageAttributes,
    seen_count: u32,
}

/// Envelope handed out with each in-memory delivery
#[derive(Debug, Clone)]
pub struct MemoryEnvelope {
    /// Queue-assigned message id
    pub message_id: Uuid,

    /// Receive count at the time of this delivery (1-based)
    pub seen_count: u32,
}

/// A message that exhausted its retries
#[derive(Debug, Clone)]
struct DeadLetter {
    message: QueuedMessage,
    dead_at: DateTime<Utc>,
}

/// Inspectable summary of a dead-lettered message
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    /// Message name
    pub name: String,

    /// Serialized body as it was enqueued
    pub body: String,

    /// Deliveries consumed before dead-lettering
    pub seen_count: u32,

    /// When the message was dead-lettered
    pub dead_at: DateTime<Utc>,
}

struct MemoryTransportInner {
    config: MemoryTransportConfig,
    queue: Mutex<VecDeque<QueuedMessage>>,
    in_flight: Mutex<HashMap<Uuid, QueuedMessage>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    available: Notify,
    running: AtomicBool,
}

/// In-memory FIFO transport
///
/// Cheap to clone; all clones share the same queue, so tests can keep a
/// handle for depth assertions after handing one to the bus.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryTransportInner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(MemoryTransportConfig::default())
    }
}

impl MemoryTransport {
    /// Create a transport with the given configuration
    pub fn new(config: MemoryTransportConfig) -> Self {
        Self {
            inner: Arc::new(MemoryTransportInner {
                config,
                queue: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                available: Notify::new(),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Number of messages waiting in the queue
    pub fn depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Number of messages currently leased to the dispatch loop
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Number of dead-lettered messages
    pub fn dead_letter_count(&self) -> usize {
        self.inner.dead_letters.lock().len()
    }

    /// Names of dead-lettered messages, in arrival order
    pub fn dead_letter_names(&self) -> Vec<String> {
        self.dead_letters().into_iter().map(|d| d.name).collect()
    }

    /// Dead-lettered messages, in arrival order
    pub fn dead_letters(&self) -> Vec<DeadLetteredMessage> {
        self.inner
            .dead_letters
            .lock()
            .iter()
            .map(|d| DeadLetteredMessage {
                name: d.message.name.clone(),
                body: d.message.body.clone(),
                seen_count: d.message.seen_count,
                dead_at: d.dead_at,
            })
            .collect()
    }

    /// Drop all queued, in-flight, and dead-lettered messages
    pub fn clear(&self) {
        self.inner.queue.lock().clear();
        self.inner.in_flight.lock().clear();
        self.inner.dead_letters.lock().clear();
    }

    fn enqueue(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(TransportError::NotRunning);
        }

        let queued = QueuedMessage {
            id: Uuid::now_v7(),
            name: message.name,
            body: message.body,
            attributes: message.attributes,
            seen_count: 0,
        };
        trace!(message_name = %queued.name, message_id = %queued.id, "enqueued message");
        self.inner.queue.lock().push_back(queued);
        self.inner.available.notify_one();
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Envelope = MemoryEnvelope;

    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.enqueue(message)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.enqueue(message)
    }

    async fn read_next_message(
        &self,
    ) -> Result<Option<TransportMessage<Self::Envelope>>, TransportError> {
        loop {
            if !self.inner.running.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let next = {
                let mut queue = self.inner.queue.lock();
                queue.pop_front()
            };

            if let Some(mut message) = next {
                message.seen_count += 1;
                let delivery = TransportMessage {
                    id: Some(message.id.to_string()),
                    body: message.body.clone(),
                    attributes: message.attributes.clone(),
                    seen_count: message.seen_count,
                    raw: MemoryEnvelope {
                        message_id: message.id,
                        seen_count: message.seen_count,
                    },
                };
                self.inner.in_flight.lock().insert(message.id, message);
                return Ok(Some(delivery));
            }

            let wait = tokio::time::timeout(
                self.inner.config.receive_timeout,
                self.inner.available.notified(),
            );
            if wait.await.is_err() {
                // Receive window elapsed without traffic
                return Ok(None);
            }
        }
    }

    async fn delete_message(
        &self,
        message: TransportMessage<Self::Envelope>,
    ) -> Result<(), TransportError> {
        let removed = self.inner.in_flight.lock().remove(&message.raw.message_id);
        match removed {
            Some(queued) => {
                trace!(message_name = %queued.name, message_id = %queued.id, "deleted message");
                Ok(())
            }
            None => Err(TransportError::Delete(format!(
                "message {} is not in flight",
                message.raw.message_id
            ))),
        }
    }

    async fn return_message(
        &self,
        message: TransportMessage<Self::Envelope>,
    ) -> Result<(), TransportError> {
        let queued = self
            .inner
            .in_flight
            .lock()
            .remove(&message.raw.message_id)
            .ok_or_else(|| {
                TransportError::Return(format!(
                    "message {} is not in flight",
                    message.raw.message_id
                ))
            })?;

        if queued.seen_count >= self.inner.config.max_retries {
            warn!(
                message_name = %queued.name,
                message_id = %queued.id,
                seen_count = queued.seen_count,
                "message exhausted retries, dead-lettering"
            );
            self.inner.dead_letters.lock().push(DeadLetter {
                message: queued,
                dead_at: Utc::now(),
            });
            return Ok(());
        }

        debug!(
            message_name = %queued.name,
            message_id = %queued.id,
            seen_count = queued.seen_count,
            "returned message for redelivery"
        );
        self.inner.queue.lock().push_back(queued);
        self.inner.available.notify_one();
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.inner.running.store(false, Ordering::SeqCst);
        // Wake any blocked reader so it can observe the stop
        self.inner.available.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(name: &str) -> OutgoingMessage {
        OutgoingMessage {
            name: name.to_string(),
            body: format!("{{\"$name\":\"{name}\"}}"),
            attributes: MessageAttributes::default(),
        }
    }

    #[tokio::test]
    async fn test_publish_read_delete() {
        let transport = MemoryTransport::default();
        transport.publish(outgoing("a")).await.unwrap();
        assert_eq!(transport.depth(), 1);

        let message = transport.read_next_message().await.unwrap().unwrap();
        assert_eq!(message.seen_count, 1);
        assert_eq!(transport.depth(), 0);
        assert_eq!(transport.in_flight_count(), 1);

        transport.delete_message(message).await.unwrap();
        assert_eq!(transport.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_return_increments_seen_count() {
        let transport = MemoryTransport::default();
        transport.send(outgoing("a")).await.unwrap();

        let first = transport.read_next_message().await.unwrap().unwrap();
        assert_eq!(first.seen_count, 1);
        transport.return_message(first).await.unwrap();
        assert_eq!(transport.depth(), 1);

        let second = transport.read_next_message().await.unwrap().unwrap();
        assert_eq!(second.seen_count, 2);
        transport.delete_message(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_times_out_when_empty() {
        let transport = MemoryTransport::new(
            MemoryTransportConfig::new().with_receive_timeout(Duration::from_millis(10)),
        );
        let read = transport.read_next_message().await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let transport =
            MemoryTransport::new(MemoryTransportConfig::new().with_max_retries(2));
        transport.send(outgoing("doomed")).await.unwrap();

        for _ in 0..2 {
            let message = transport.read_next_message().await.unwrap().unwrap();
            transport.return_message(message).await.unwrap();
        }

        assert_eq!(transport.depth(), 0);
        assert_eq!(transport.dead_letter_count(), 1);

        let dead = transport.dead_letters();
        assert_eq!(dead[0].name, "doomed");
        assert_eq!(dead[0].seen_count, 2);
    }

    #[tokio::test]
    async fn test_stopped_transport_rejects_enqueue() {
        let transport = MemoryTransport::default();
        transport.stop().await.unwrap();
        assert!(matches!(
            transport.publish(outgoing("a")).await,
            Err(TransportError::NotRunning)
        ));

        transport.start().await.unwrap();
        transport.publish(outgoing("a")).await.unwrap();
    }
}
