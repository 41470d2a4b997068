//! Bus dispatch loop
//!
//! One reader task pulls messages from the transport and fans each out to
//! its own tokio task, bounded by the configured concurrency. A message is
//! deleted when every handler succeeds and returned to the transport
//! otherwise; the transport owns redelivery and dead-lettering.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, trace, warn};

use crate::handler::{HandlerContext, HandlerError};
use crate::hooks::FailedMessage;
use crate::serializer::wire_name;
use crate::transport::{Transport, TransportMessage};

use super::frame::{with_frame, HandlerFrame};
use super::BusInner;

pub(crate) async fn run_dispatch_loop<T: Transport>(
    inner: Arc<BusInner<T>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(inner.concurrency));
    let mut in_flight = JoinSet::new();
    debug!(concurrency = inner.concurrency, "dispatch loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Reap handler tasks that have already finished
        while in_flight.try_join_next().is_some() {}

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_rx.changed() => continue,
        };

        let read = tokio::select! {
            read = inner.transport.read_next_message() => read,
            _ = shutdown_rx.changed() => continue,
        };

        match read {
            Ok(Some(message)) => {
                let inner = inner.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    process_message(inner, message).await;
                });
            }
            // Receive window elapsed without traffic
            Ok(None) => {}
            Err(error) => {
                warn!(%error, "failed to read from transport");
            }
        }
    }

    // Drain: in-flight handlers run to completion
    while in_flight.join_next().await.is_some() {}
    debug!("dispatch loop stopped");
}

#[instrument(skip(inner, message), fields(message_id = ?message.id, seen_count = message.seen_count))]
async fn process_message<T: Transport>(
    inner: Arc<BusInner<T>>,
    message: TransportMessage<T::Envelope>,
) {
    let body = match inner.serializer.deserialize(&message.body) {
        Ok(body) => body,
        Err(error) => {
            let error = HandlerError::from(error);
            warn!(%error, "failed to decode message body");
            emit_error_hook(&inner, &Value::Null, &message, &error);
            return_to_transport(&inner, message).await;
            return;
        }
    };

    let name = wire_name(&body).map(str::to_string);
    let handlers = inner.registry.get(name.as_deref(), &body);
    if handlers.is_empty() {
        trace!(message_name = ?name, "no handlers resolved, deleting message");
        if let Err(error) = inner.transport.delete_message(message).await {
            warn!(%error, "failed to delete unhandled message");
        }
        return;
    }

    let frame = HandlerFrame::for_message(&message.attributes);
    let context = HandlerContext {
        message: body.clone(),
        attributes: message.attributes.clone(),
        bus: inner.client.clone(),
    };

    let result = with_frame(frame, async {
        for handler in &handlers {
            handler(context.clone()).await?;
        }
        Ok::<_, HandlerError>(())
    })
    .await;

    match result {
        Ok(()) => {
            trace!(message_name = ?name, handlers = handlers.len(), "message handled");
            if let Err(error) = inner.transport.delete_message(message).await {
                warn!(%error, "failed to delete handled message");
            }
        }
        Err(error) => {
            if error.is_optimistic_conflict() {
                // Expected contention: redeliver and re-run against
                // current state, no error hook
                debug!(
                    message_name = ?name,
                    %error,
                    "stale workflow state, returning message for retry"
                );
            } else {
                warn!(message_name = ?name, %error, "handler failed, returning message");
                emit_error_hook(&inner, &body, &message, &error);
            }
            return_to_transport(&inner, message).await;
        }
    }
}

fn emit_error_hook<T: Transport>(
    inner: &BusInner<T>,
    body: &Value,
    message: &TransportMessage<T::Envelope>,
    error: &HandlerError,
) {
    inner.hooks.emit_error(&FailedMessage {
        name: wire_name(body),
        body,
        attributes: &message.attributes,
        message_id: message.id.as_deref(),
        seen_count: message.seen_count,
        error,
    });
}

async fn return_to_transport<T: Transport>(
    inner: &BusInner<T>,
    message: TransportMessage<T::Envelope>,
) {
    if let Err(error) = inner.transport.return_message(message).await {
        warn!(%error, "failed to return message to transport");
    }
}
