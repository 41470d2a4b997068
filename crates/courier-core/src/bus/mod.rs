//! Bus core
//!
//! This module provides:
//! - [`Bus`] — lifecycle, publish/send entry points, hook surface
//! - [`BusBuilder`] — the only legal way to install dependencies
//! - [`BusClient`] — cheap-clone handle for nested send/publish
//! - the dispatch loop coupling the transport to registered handlers

mod builder;
mod client;
mod dispatch;
mod frame;

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use courier_messages::{Command, Event, MessageAttributes};

pub use builder::{BusBuilder, NoTransport};
pub use client::BusClient;

use crate::error::BusError;
use crate::hooks::{FailedMessage, HookId, HookRegistry};
use crate::persistence::WorkflowStore;
use crate::registry::HandlerRegistry;
use crate::serializer::Serializer;
use crate::transport::Transport;
use crate::workflow::WorkflowRegistry;

use dispatch::run_dispatch_loop;

/// Bus lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// No dependencies installed yet (builder stage)
    Uninitialized,

    /// Wiring complete, dispatch loop not running
    Initialized,

    /// `start` in progress
    Starting,

    /// Dispatch loop running
    Started,

    /// `stop` in progress, draining in-flight handlers
    Stopping,

    /// Dispatch loop stopped; `start` is legal again
    Stopped,
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

pub(crate) struct BusInner<T> {
    pub(crate) transport: Arc<T>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) client: BusClient,
    pub(crate) persistence: Option<Arc<dyn WorkflowStore>>,
    pub(crate) workflows: WorkflowRegistry,
    pub(crate) concurrency: usize,
    pub(crate) state: RwLock<BusState>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// The service bus
///
/// Built through [`Bus::configure`]; see the crate docs for an example.
/// Cloning is cheap and clones share the same bus.
pub struct Bus<T> {
    pub(crate) inner: Arc<BusInner<T>>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Bus<NoTransport> {
    /// Begin configuring a bus
    pub fn configure() -> BusBuilder<NoTransport> {
        BusBuilder::new()
    }
}

impl<T: Transport> Bus<T> {
    /// Current lifecycle state
    pub fn state(&self) -> BusState {
        *self.inner.state.read()
    }

    /// Handle for send/publish, shareable with application components
    pub fn client(&self) -> BusClient {
        self.inner.client.clone()
    }

    /// Begin the dispatch loop
    ///
    /// Legal from `Initialized` or `Stopped`.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), BusError> {
        let previous = {
            let mut state = self.inner.state.write();
            match *state {
                BusState::Initialized | BusState::Stopped => {
                    let previous = *state;
                    *state = BusState::Starting;
                    previous
                }
                other => {
                    return Err(BusError::InvalidStateTransition {
                        operation: "start",
                        state: other,
                    })
                }
            }
        };

        if let Err(error) = self.inner.transport.start().await {
            *self.inner.state.write() = previous;
            return Err(error.into());
        }

        let _ = self.inner.shutdown_tx.send(false);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_dispatch_loop(self.inner.clone(), shutdown_rx));
        *self.inner.loop_handle.lock().await = Some(handle);

        *self.inner.state.write() = BusState::Started;
        info!("bus started");
        Ok(())
    }

    /// Stop the dispatch loop
    ///
    /// Stops reading from the transport and waits for in-flight handlers
    /// to drain. Legal only from `Started`.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), BusError> {
        {
            let mut state = self.inner.state.write();
            match *state {
                BusState::Started => *state = BusState::Stopping,
                other => {
                    return Err(BusError::InvalidStateTransition {
                        operation: "stop",
                        state: other,
                    })
                }
            }
        }

        let _ = self.inner.shutdown_tx.send(true);
        if let Some(handle) = self.inner.loop_handle.lock().await.take() {
            if let Err(error) = handle.await {
                warn!(%error, "dispatch loop terminated abnormally");
            }
        }

        let stop_result = self.inner.transport.stop().await;
        *self.inner.state.write() = BusState::Stopped;
        info!("bus stopped");
        stop_result.map_err(BusError::from)
    }

    /// Release persistence resources
    ///
    /// Legal while the dispatch loop is not running.
    pub async fn dispose(&self) -> Result<(), BusError> {
        let state = self.state();
        if !matches!(state, BusState::Initialized | BusState::Stopped) {
            return Err(BusError::InvalidStateTransition {
                operation: "dispose",
                state,
            });
        }
        self.inner
            .workflows
            .dispose(self.inner.persistence.as_ref())
            .await
    }

    /// Publish an event with empty attributes
    pub async fn publish<E: Event>(&self, event: &E) -> Result<(), BusError> {
        self.inner.client.publish(event).await
    }

    /// Publish an event with attributes
    pub async fn publish_with<E: Event>(
        &self,
        event: &E,
        attributes: MessageAttributes,
    ) -> Result<(), BusError> {
        self.inner.client.publish_with(event, attributes).await
    }

    /// Send a command with empty attributes
    pub async fn send<C: Command>(&self, command: &C) -> Result<(), BusError> {
        self.inner.client.send(command).await
    }

    /// Send a command with attributes
    pub async fn send_with<C: Command>(
        &self,
        command: &C,
        attributes: MessageAttributes,
    ) -> Result<(), BusError> {
        self.inner.client.send_with(command, attributes).await
    }

    /// Register a `send` hook listener
    pub fn on_send(
        &self,
        listener: impl Fn(&str, &Value, &MessageAttributes) + Send + Sync + 'static,
    ) -> HookId {
        self.inner.hooks.on_send(listener)
    }

    /// Register a `publish` hook listener
    pub fn on_publish(
        &self,
        listener: impl Fn(&str, &Value, &MessageAttributes) + Send + Sync + 'static,
    ) -> HookId {
        self.inner.hooks.on_publish(listener)
    }

    /// Register an `error` hook listener
    pub fn on_error(
        &self,
        listener: impl Fn(&FailedMessage<'_>) + Send + Sync + 'static,
    ) -> HookId {
        self.inner.hooks.on_error(listener)
    }

    /// Remove a hook listener
    pub fn off(&self, id: HookId) -> bool {
        self.inner.hooks.off(id)
    }
}
