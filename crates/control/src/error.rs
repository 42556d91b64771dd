use taskmesh_broker::BrokerError;
use taskmesh_core::ledger::LedgerError;

/// Errors that stop the control plane from starting.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
