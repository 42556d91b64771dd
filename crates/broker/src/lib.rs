//! Message-broker plumbing for taskmesh.
//!
//! Provides the [`BrokerChannel`](channel::BrokerChannel) seam, two
//! implementations of it (AMQP via `lapin` and an in-process
//! [`MemoryBroker`](memory::MemoryBroker)), the
//! [`ConnectionManager`](manager::ConnectionManager) that owns the
//! connect / reconnect lifecycle, and the consumer loop that re-attaches
//! consumers whenever the manager swaps in a new channel.

pub mod amqp;
pub mod channel;
pub mod config;
pub mod connector;
pub mod consumer;
pub mod error;
pub mod events;
pub mod manager;
pub mod memory;
pub mod reconnect;
pub mod shutdown;

pub use channel::{BrokerChannel, Delivery, DeliveryMode, QueueSpec};
pub use config::{BrokerBackend, BrokerConfig};
pub use connector::BrokerConnector;
pub use consumer::{run_consumer, DeliveryHandler, Disposition};
pub use error::BrokerError;
pub use events::ConnectionEvent;
pub use manager::{ChannelHandle, ConnectionManager, ConnectionOptions, ConnectionState, Publisher};
pub use memory::MemoryBroker;
pub use reconnect::ReconnectPolicy;
pub use shutdown::join_or_abort;
