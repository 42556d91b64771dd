//! Broker connection manager.
//!
//! [`ConnectionManager`] owns one broker connection for its whole
//! lifetime. [`connect`](ConnectionManager::connect) makes the initial
//! connection under a bounded retry budget; afterwards a supervisor task
//! watches the channel and, when it closes, reconnects indefinitely at a
//! fixed delay.
//!
//! The current channel lives in a single [`watch`] cell together with a
//! generation number. Publishers read the cell on every call and
//! consumers (see [`run_consumer`](crate::consumer::run_consumer)) wait
//! on it for the next generation, so a reconnect is picked up without
//! anyone re-registering.
//!
//! Lifecycle events are broadcast via a [`tokio::sync::broadcast`]
//! channel. Call [`ConnectionManager::events`] to receive them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{default_topology, BrokerChannel, DeliveryMode, QueueSpec};
use crate::connector::BrokerConnector;
use crate::error::BrokerError;
use crate::events::ConnectionEvent;
use crate::reconnect::{connect_with_budget, reconnect_forever, ReconnectPolicy};
use crate::shutdown::join_or_abort;

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long [`ConnectionManager::shutdown`] waits for the supervisor.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// What a manager sets up on every (re)connect.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Label used in log lines.
    pub name: String,
    pub topology: Vec<QueueSpec>,
    /// Per-channel prefetch credit. `None` leaves the broker default.
    pub prefetch: Option<u16>,
    pub policy: ReconnectPolicy,
}

impl ConnectionOptions {
    /// Default taskmesh topology, no prefetch limit, default policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topology: default_topology(),
            prefetch: None,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A live channel tagged with the generation it was installed as.
#[derive(Clone)]
pub struct ChannelHandle {
    pub generation: u64,
    pub channel: Arc<dyn BrokerChannel>,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("generation", &self.generation)
            .field("open", &self.channel.is_open())
            .finish()
    }
}

/// Publishes to a queue through whatever channel is current.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Fails with [`BrokerError::ChannelUnavailable`] while disconnected.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        mode: DeliveryMode,
    ) -> Result<(), BrokerError>;
}

pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    options: ConnectionOptions,
    handle_tx: watch::Sender<Option<ChannelHandle>>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    generation: AtomicU64,
    /// Cancelled during shutdown.
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, options: ConnectionOptions) -> Arc<Self> {
        let (handle_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            connector,
            options,
            handle_tx,
            state_tx,
            event_tx,
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.options.policy
    }

    /// Make the initial connection and start the reconnect supervisor.
    ///
    /// Tries up to `policy.startup_attempts` times; exhausting the budget
    /// returns [`BrokerError::RetriesExhausted`] and leaves the manager
    /// disconnected. Calling this on a manager that is already supervising
    /// returns the current handle.
    pub async fn connect(self: &Arc<Self>) -> Result<ChannelHandle, BrokerError> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            return self.current().ok_or(BrokerError::ChannelUnavailable);
        }

        tracing::info!(
            name = %self.options.name,
            target = %self.connector.describe(),
            "Connecting to broker",
        );
        self.state_tx.send_replace(ConnectionState::Connecting);

        let channel =
            match connect_with_budget(&self.options.policy, &self.cancel, || self.open()).await {
                Ok(channel) => channel,
                Err(e) => {
                    self.state_tx.send_replace(ConnectionState::Disconnected);
                    tracing::error!(name = %self.options.name, error = %e, "Broker connect failed");
                    return Err(e);
                }
            };

        let handle = self.install(channel);
        let manager = Arc::clone(self);
        let first = handle.clone();
        *supervisor = Some(tokio::spawn(async move {
            manager.supervise(first).await;
        }));

        Ok(handle)
    }

    /// The currently installed channel, if connected.
    pub fn current(&self) -> Option<ChannelHandle> {
        self.handle_tx.borrow().clone()
    }

    /// Watch the channel cell. `None` means disconnected.
    pub fn subscribe(&self) -> watch::Receiver<Option<ChannelHandle>> {
        self.handle_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Token cancelled when the manager shuts down. Consumers take child
    /// tokens of it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop reconnecting and close the current channel.
    ///
    /// Waits up to 5 seconds for the supervisor task to exit, then aborts it.
    pub async fn shutdown(&self) {
        tracing::info!(name = %self.options.name, "Shutting down broker connection");
        self.state_tx.send_replace(ConnectionState::Closing);
        self.cancel.cancel();

        if let Some(task) = self.supervisor.lock().await.take() {
            join_or_abort("connection-supervisor", task, SHUTDOWN_TIMEOUT).await;
        }

        if let Some(handle) = self.handle_tx.send_replace(None) {
            if let Err(e) = handle.channel.close().await {
                tracing::debug!(error = %e, "Error closing broker channel");
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        tracing::info!(name = %self.options.name, "Broker connection shut down");
    }

    // ---- private helpers ----

    /// Connect, declare the topology and apply the prefetch credit.
    async fn open(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self.connector.connect().await?;

        if let Err(e) = self.prepare(channel.as_ref()).await {
            let _ = channel.close().await;
            return Err(e);
        }

        Ok(channel)
    }

    async fn prepare(&self, channel: &dyn BrokerChannel) -> Result<(), BrokerError> {
        for queue in &self.options.topology {
            channel.declare_queue(queue).await?;
        }
        if let Some(prefetch) = self.options.prefetch {
            channel.set_prefetch(prefetch).await?;
        }
        Ok(())
    }

    fn install(&self, channel: Arc<dyn BrokerChannel>) -> ChannelHandle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ChannelHandle {
            generation,
            channel,
        };

        self.handle_tx.send_replace(Some(handle.clone()));
        self.state_tx.send_replace(ConnectionState::Connected);
        let _ = self.event_tx.send(ConnectionEvent::Connected { generation });

        tracing::info!(name = %self.options.name, generation, "Broker channel ready");
        handle
    }

    fn mark_lost(&self, generation: u64) {
        // Only clear the cell if it still holds the channel that closed.
        self.handle_tx.send_if_modified(|current| match current {
            Some(handle) if handle.generation == generation => {
                *current = None;
                true
            }
            _ => false,
        });
        self.state_tx.send_replace(ConnectionState::Disconnected);
        let _ = self.event_tx.send(ConnectionEvent::Disconnected { generation });

        tracing::warn!(
            name = %self.options.name,
            generation,
            delay_secs = self.options.policy.reconnect_delay.as_secs(),
            "Broker channel closed, scheduling reconnect",
        );
    }

    /// Wait for the current channel to close, then reconnect. Runs until
    /// the manager is cancelled.
    async fn supervise(self: Arc<Self>, mut current: ChannelHandle) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = current.channel.closed() => {}
            }
            if self.cancel.is_cancelled() {
                return;
            }

            self.mark_lost(current.generation);

            let reopened = reconnect_forever(
                &self.options.policy,
                &self.cancel,
                || self.open(),
                |attempt| {
                    self.state_tx.send_replace(ConnectionState::Connecting);
                    let _ = self.event_tx.send(ConnectionEvent::ReconnectAttempt { attempt });
                },
            )
            .await;

            match reopened {
                Some(channel) if self.cancel.is_cancelled() => {
                    let _ = channel.close().await;
                    return;
                }
                Some(channel) => current = self.install(channel),
                None => return,
            }
        }
    }
}

#[async_trait]
impl Publisher for ConnectionManager {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        mode: DeliveryMode,
    ) -> Result<(), BrokerError> {
        let handle = self.current().ok_or(BrokerError::ChannelUnavailable)?;
        handle.channel.publish(queue, payload, mode).await
    }
}
