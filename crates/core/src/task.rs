//! Task lifecycle values and their broker wire encoding.
//!
//! Every message on the broker is a JSON object with camelCase keys.
//! `createdAt` travels as unix seconds and `completedAt` as unix
//! milliseconds, matching what existing producers emit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{NodeId, TaskId, Timestamp};

/// Maximum length of a node identifier or node name.
const MAX_NODE_FIELD_LEN: usize = 128;

/// A unit of work created on the ledger. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: TaskId,
    pub question: String,
    #[serde(alias = "timestamp", with = "chrono::serde::ts_seconds")]
    pub created_at: Timestamp,
}

impl Task {
    /// Pair this task with the worker chosen to run it.
    pub fn assign_to(self, node_id: impl Into<NodeId>) -> Assignment {
        Assignment {
            task: self,
            assigned_node: node_id.into(),
        }
    }
}

/// The wire message published on the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(flatten)]
    pub task: Task,
    pub assigned_node: NodeId,
}

impl Assignment {
    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }

    /// Whether this assignment is logically addressed to `node_id`.
    pub fn is_addressed_to(&self, node_id: &str) -> bool {
        self.assigned_node == node_id
    }
}

/// Completion message published by a worker after the ledger confirmed
/// the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub answer: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: Timestamp,
}

/// Identity a worker announces on the registration queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIdentity {
    pub node_id: NodeId,
    pub node_name: String,
    /// Ledger address the worker signs transactions with.
    #[serde(alias = "nodeAddress")]
    pub address: String,
}

impl WorkerIdentity {
    pub fn new(
        node_id: impl Into<NodeId>,
        node_name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            address: address.into(),
        }
    }

    /// Reject identities that cannot be used as round-robin keys.
    ///
    /// Rules:
    /// - `node_id` must not be empty or exceed 128 characters.
    /// - `node_name` must not exceed 128 characters.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.node_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "nodeId must not be empty".to_string(),
            ));
        }
        if self.node_id.len() > MAX_NODE_FIELD_LEN {
            return Err(CoreError::Validation(format!(
                "nodeId must not exceed {MAX_NODE_FIELD_LEN} characters"
            )));
        }
        if self.node_name.len() > MAX_NODE_FIELD_LEN {
            return Err(CoreError::Validation(format!(
                "nodeName must not exceed {MAX_NODE_FIELD_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// Serialize a wire message to its JSON payload.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CoreError> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse a JSON payload into a wire message.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CoreError> {
    Ok(serde_json::from_slice(payload)?)
}
