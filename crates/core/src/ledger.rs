//! Abstract interface to the authoritative task ledger.
//!
//! The ledger is the single source of truth for whether a task has been
//! assigned or completed. Implementations bind a signing identity
//! ([`LedgerClient::address`]) so that `assign`, `complete` and
//! `register_node` are attributed to the calling worker.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::task::Task;
use crate::types::{TaskId, Timestamp};

/// `TaskCreated(taskId, question, timestamp)` as emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: TaskId,
    pub question: String,
    pub timestamp: Timestamp,
}

impl From<TaskCreated> for Task {
    fn from(event: TaskCreated) -> Self {
        Task {
            task_id: event.task_id,
            question: event.question,
            created_at: event.timestamp,
        }
    }
}

/// Current on-ledger lifecycle state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerTaskState {
    Created,
    Assigned { address: String },
    Completed { address: String, answer: String },
}

impl LedgerTaskState {
    /// Address the task is assigned to, if any.
    pub fn assignee(&self) -> Option<&str> {
        match self {
            Self::Created => None,
            Self::Assigned { address } | Self::Completed { address, .. } => Some(address),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Receipt for a confirmed ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_id: String,
}

/// Per-node counters kept by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub name: String,
    pub address: String,
    pub registered_at: Timestamp,
    pub tasks_completed: u64,
    pub active: bool,
}

/// Stream of `TaskCreated` events in ledger order.
pub type TaskCreatedStream = BoxStream<'static, Result<TaskCreated, LedgerError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// The ledger rejected the state transition.
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Unknown task {0}")]
    UnknownTask(TaskId),

    #[error("Unknown node {0}")]
    UnknownNode(String),

    /// The ledger could not be reached.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The event subscriber fell behind and missed events.
    #[error("Event feed lagged, {0} events skipped")]
    Lagged(u64),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address this client signs transactions with.
    fn address(&self) -> &str;

    /// Subscribe to `TaskCreated` events emitted from now on.
    async fn subscribe_task_created(&self) -> Result<TaskCreatedStream, LedgerError>;

    /// Read the current lifecycle state of a task.
    async fn task_state(&self, task_id: &str) -> Result<LedgerTaskState, LedgerError>;

    /// `isAssigned(taskId)`: the assignee address, or `None` when unassigned.
    async fn is_assigned(&self, task_id: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.task_state(task_id).await?.assignee().map(str::to_string))
    }

    /// `isCompleted(taskId)`.
    async fn is_completed(&self, task_id: &str) -> Result<bool, LedgerError> {
        Ok(self.task_state(task_id).await?.is_completed())
    }

    /// Assign the task to [`address`](Self::address) and wait for confirmation.
    async fn assign(&self, task_id: &str) -> Result<Confirmation, LedgerError>;

    /// Record the answer and wait for confirmation.
    async fn complete(&self, task_id: &str, answer: &str) -> Result<Confirmation, LedgerError>;

    async fn node_stats(&self, address: &str) -> Result<NodeStats, LedgerError>;

    async fn is_node_active(&self, address: &str) -> Result<bool, LedgerError>;

    /// Register [`address`](Self::address) as an active node named `name`.
    async fn register_node(&self, name: &str) -> Result<Confirmation, LedgerError>;

    /// Create a new task; the ledger emits `TaskCreated` for it.
    async fn create_task(&self, question: &str) -> Result<TaskId, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignee_of_each_state() {
        assert_eq!(LedgerTaskState::Created.assignee(), None);
        let assigned = LedgerTaskState::Assigned {
            address: "0x1".into(),
        };
        assert_eq!(assigned.assignee(), Some("0x1"));
        assert!(!assigned.is_completed());

        let completed = LedgerTaskState::Completed {
            address: "0x1".into(),
            answer: "4".into(),
        };
        assert_eq!(completed.assignee(), Some("0x1"));
        assert!(completed.is_completed());
    }

    #[test]
    fn task_created_converts_to_task() {
        let now = chrono::Utc::now();
        let task: Task = TaskCreated {
            task_id: "3".into(),
            question: "why?".into(),
            timestamp: now,
        }
        .into();
        assert_eq!(task.task_id, "3");
        assert_eq!(task.created_at, now);
    }
}
