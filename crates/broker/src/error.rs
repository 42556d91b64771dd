/// Errors raised by broker connections, channels and the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Failed to establish a connection to the broker.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No channel is currently installed (disconnected or reconnecting).
    #[error("Broker channel unavailable")]
    ChannelUnavailable,

    /// The channel was closed underneath the caller.
    #[error("Broker channel closed")]
    ChannelClosed,

    #[error("Queue {0} not found")]
    QueueNotFound(String),

    /// The broker refused an operation (inequivalent declare, stale tag, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The startup retry budget was exhausted.
    #[error("Gave up connecting after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The connection manager was shut down while connecting.
    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}
