//! In-process broker.
//!
//! [`MemoryBroker`] implements the subset of AMQP queue semantics taskmesh
//! relies on: durable and transient queues, persistent and transient
//! messages, manual acknowledgement, reject with or without requeue,
//! per-channel prefetch, and redelivery of unacknowledged messages when a
//! channel closes. It also lets tests sever every connection, restart the
//! broker, or take it offline to exercise the reconnect path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::channel::{Acker, BrokerChannel, Delivery, DeliveryMode, DeliveryStream, QueueSpec};
use crate::connector::BrokerConnector;
use crate::error::BrokerError;

/// URL reported by the memory connector.
pub const MEMORY_URL: &str = "memory://";

/// Handle to a shared in-process broker. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    /// Signalled on every publish, settle and channel close.
    changed: Notify,
    connects: AtomicU32,
    next_channel: AtomicU64,
    offline: AtomicBool,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, MemoryQueue>,
    channels: HashMap<u64, ChannelState>,
    next_tag: u64,
}

struct MemoryQueue {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    /// Delivered but not yet settled, by delivery tag.
    unacked: HashMap<u64, Unacked>,
}

struct Unacked {
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    persistent: bool,
    redelivered: bool,
}

struct ChannelState {
    closed: CancellationToken,
    prefetch: Option<u16>,
    in_flight: usize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector producing channels on this broker.
    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(MemoryConnector {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Close every open channel, as if the broker dropped all connections.
    /// Unacknowledged messages return to their queues.
    pub fn sever_connections(&self) {
        let ids: Vec<u64> = self.inner.lock().channels.keys().copied().collect();
        tracing::debug!(channels = ids.len(), "Severing memory broker connections");
        for id in ids {
            self.inner.close_channel(id);
        }
    }

    /// Simulate a broker restart: sever all connections, then drop
    /// non-durable queues and non-persistent messages.
    pub fn restart(&self) {
        self.sever_connections();
        {
            let mut state = self.inner.lock();
            state.queues.retain(|_, queue| queue.durable);
            for queue in state.queues.values_mut() {
                queue.ready.retain(|message| message.persistent);
            }
        }
        self.inner.changed.notify_waiters();
    }

    /// While offline every connect attempt fails.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of connect attempts made so far, successful or not.
    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn open_channels(&self) -> usize {
        self.inner.lock().channels.len()
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.inner.lock().queues.contains_key(queue)
    }

    /// Messages waiting for delivery.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    /// Payloads waiting in `queue`, head first.
    pub fn peek(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_channel(&self) -> Result<(u64, CancellationToken), BrokerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("memory broker is offline".into()));
        }

        let id = self.next_channel.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = CancellationToken::new();
        self.lock().channels.insert(
            id,
            ChannelState {
                closed: closed.clone(),
                prefetch: None,
                in_flight: 0,
            },
        );
        Ok((id, closed))
    }

    fn close_channel(&self, channel_id: u64) {
        {
            let mut state = self.lock();
            let Some(channel) = state.channels.remove(&channel_id) else {
                return;
            };
            channel.closed.cancel();

            for queue in state.queues.values_mut() {
                let mut tags: Vec<u64> = queue
                    .unacked
                    .iter()
                    .filter(|(_, u)| u.channel_id == channel_id)
                    .map(|(tag, _)| *tag)
                    .collect();
                // Push back in reverse so the oldest delivery ends up first.
                tags.sort_unstable_by(|a, b| b.cmp(a));
                for tag in tags {
                    if let Some(unacked) = queue.unacked.remove(&tag) {
                        let mut message = unacked.message;
                        message.redelivered = true;
                        queue.ready.push_front(message);
                    }
                }
            }
        }
        self.changed.notify_waiters();
    }

    fn ensure_open(&self, channel_id: u64) -> Result<(), BrokerError> {
        if self.lock().channels.contains_key(&channel_id) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }

    /// Take the next deliverable message for a consumer on `channel_id`,
    /// honouring the channel's prefetch credit.
    fn take(self: &Arc<Self>, channel_id: u64, queue_name: &str) -> Option<Delivery> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let channel = state.channels.get_mut(&channel_id)?;
        if let Some(prefetch) = channel.prefetch {
            if channel.in_flight >= usize::from(prefetch) {
                return None;
            }
        }

        let queue = state.queues.get_mut(queue_name)?;
        let message = queue.ready.pop_front()?;

        state.next_tag += 1;
        let tag = state.next_tag;
        channel.in_flight += 1;
        queue.unacked.insert(
            tag,
            Unacked {
                channel_id,
                message: message.clone(),
            },
        );

        let acker = MemoryAcker {
            inner: Arc::clone(self),
            queue: queue_name.to_string(),
            tag,
        };
        Some(Delivery::new(
            message.payload,
            message.redelivered,
            Box::new(acker),
        ))
    }

    fn settle(&self, queue_name: &str, tag: u64, requeue: Option<bool>) -> Result<(), BrokerError> {
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            let queue = state
                .queues
                .get_mut(queue_name)
                .ok_or_else(|| BrokerError::QueueNotFound(queue_name.to_string()))?;
            let unacked = queue
                .unacked
                .remove(&tag)
                .ok_or_else(|| BrokerError::Protocol(format!("unknown delivery tag {tag}")))?;

            if let Some(channel) = state.channels.get_mut(&unacked.channel_id) {
                channel.in_flight = channel.in_flight.saturating_sub(1);
            }

            if requeue == Some(true) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }
}

struct MemoryConnector {
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    fn describe(&self) -> String {
        MEMORY_URL.to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let (id, closed) = self.inner.open_channel()?;
        Ok(Arc::new(MemoryChannel {
            id,
            inner: Arc::clone(&self.inner),
            closed,
        }))
    }
}

struct MemoryChannel {
    id: u64,
    inner: Arc<Inner>,
    closed: CancellationToken,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        self.inner.ensure_open(self.id)?;
        let mut state = self.inner.lock();

        match state.queues.get(&spec.name) {
            Some(existing) if existing.durable != spec.durable => Err(BrokerError::Protocol(
                format!("inequivalent arg 'durable' for queue '{}'", spec.name),
            )),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    MemoryQueue {
                        durable: spec.durable,
                        ready: VecDeque::new(),
                        unacked: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        let channel = state
            .channels
            .get_mut(&self.id)
            .ok_or(BrokerError::ChannelClosed)?;
        channel.prefetch = (count > 0).then_some(count);
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        mode: DeliveryMode,
    ) -> Result<(), BrokerError> {
        self.inner.ensure_open(self.id)?;
        {
            let mut state = self.inner.lock();
            match state.queues.get_mut(queue) {
                Some(q) => q.ready.push_back(StoredMessage {
                    payload: payload.to_vec(),
                    persistent: mode == DeliveryMode::Persistent,
                    redelivered: false,
                }),
                // The default exchange silently drops unroutable messages.
                None => {
                    tracing::debug!(queue, "Dropping message for undeclared queue");
                    return Ok(());
                }
            }
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        self.inner.ensure_open(self.id)?;
        if !self.inner.lock().queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        tracing::debug!(queue, consumer_tag, channel = self.id, "Memory consumer started");

        let consumer = MemoryConsumer {
            inner: Arc::clone(&self.inner),
            channel_id: self.id,
            queue: queue.to_string(),
            closed: self.closed.clone(),
        };
        let stream = futures::stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next_delivery().await?;
            Some((Ok(delivery), consumer))
        });
        Ok(Box::pin(stream))
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close_channel(self.id);
        Ok(())
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    channel_id: u64,
    queue: String,
    closed: CancellationToken,
}

impl MemoryConsumer {
    /// Wait for the next delivery. `None` once the channel is closed.
    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.is_cancelled() {
                return None;
            }
            if let Some(delivery) = self.inner.take(self.channel_id, &self.queue) {
                return Some(delivery);
            }

            tokio::select! {
                _ = self.closed.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.inner.settle(&self.queue, self.tag, None)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.inner.settle(&self.queue, self.tag, Some(requeue))
    }
}
