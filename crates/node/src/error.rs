use taskmesh_broker::BrokerError;
use taskmesh_core::error::CoreError;
use taskmesh_core::ledger::LedgerError;

/// Failure while processing one assignment. The assignment is requeued.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Ledger call failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] CoreError),

    #[error("Failed to publish result: {0}")]
    Publish(#[from] BrokerError),
}

/// Errors that stop a worker node from starting.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Invalid worker identity: {0}")]
    Identity(#[from] CoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
