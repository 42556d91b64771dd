//! The channel abstraction every broker backend implements.
//!
//! A [`BrokerChannel`] is one live connection + channel pair. It is
//! single-use: once [`closed`](BrokerChannel::closed) resolves the
//! [`ConnectionManager`](crate::manager::ConnectionManager) discards it
//! and opens a fresh one.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use taskmesh_core::queues::{REGISTRATION_QUEUE, RESULT_QUEUE, TASK_QUEUE};

use crate::error::BrokerError;

/// A queue the manager declares on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    /// Durable queues survive a broker restart.
    pub durable: bool,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }

    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
        }
    }
}

/// The three taskmesh queues: durable task and result queues plus the
/// non-durable registration queue.
pub fn default_topology() -> Vec<QueueSpec> {
    vec![
        QueueSpec::durable(TASK_QUEUE),
        QueueSpec::durable(RESULT_QUEUE),
        QueueSpec::transient(REGISTRATION_QUEUE),
    ]
}

/// Whether a published message should survive a broker restart while
/// unconsumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    Persistent,
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message handed to a consumer. Must be settled with [`ack`](Self::ack)
/// or [`reject`](Self::reject).
pub struct Delivery {
    payload: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, redelivered: bool, acker: Box<dyn Acker>) -> Self {
        Self {
            payload,
            redelivered,
            acker,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Deliveries for one consumer. Ends when the channel closes.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare (or assert) a queue.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries outstanding on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Publish `payload` to `queue` through the default exchange.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        mode: DeliveryMode,
    ) -> Result<(), BrokerError>;

    /// Start a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, BrokerError>;

    fn is_open(&self) -> bool;

    /// Resolves once the channel or its underlying connection has closed,
    /// for whatever reason.
    async fn closed(&self);

    async fn close(&self) -> Result<(), BrokerError>;
}
