//! Round-robin task dispatch.

use std::sync::{Arc, Mutex, PoisonError};

use taskmesh_broker::{DeliveryMode, Publisher};
use taskmesh_core::queues::TASK_QUEUE;
use taskmesh_core::task::{encode, Task};
use taskmesh_core::types::NodeId;

use crate::registry::NodeRegistry;

/// Round-robin cursor over a node list that only grows.
///
/// The cursor is not reset when nodes are added, so a newly registered
/// node first receives work when the cursor reaches its position.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node at the cursor, advancing the cursor. `None` if `nodes` is
    /// empty.
    pub fn next<'a>(&mut self, nodes: &'a [NodeId]) -> Option<&'a NodeId> {
        if nodes.is_empty() {
            return None;
        }
        let index = self.cursor % nodes.len();
        self.cursor = (index + 1) % nodes.len();
        Some(&nodes[index])
    }
}

/// Result of dispatching one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The assignment was published for `node_id`.
    Published { node_id: NodeId },
    /// No nodes are registered; the task was dropped.
    NoNodes,
    /// The assignment could not be published; the task was dropped.
    PublishFailed { node_id: NodeId, error: String },
}

/// Picks a worker for each task and publishes the assignment.
pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    cursor: Mutex<RoundRobin>,
    publisher: Arc<dyn Publisher>,
}

impl Dispatcher {
    pub fn new(registry: Arc<NodeRegistry>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            registry,
            cursor: Mutex::new(RoundRobin::new()),
            publisher,
        }
    }

    /// The next worker in round-robin order, or `None` if none are
    /// registered.
    pub async fn assign_next(&self) -> Option<NodeId> {
        let nodes = self.registry.list_nodes().await;
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        cursor.next(&nodes).cloned()
    }

    /// Assign `task` and publish it to the task queue as a persistent
    /// message. Failures are logged and the task is dropped; nothing is
    /// retried.
    pub async fn dispatch(&self, task: Task) -> DispatchOutcome {
        let Some(node_id) = self.assign_next().await else {
            tracing::warn!(task_id = %task.task_id, "No nodes available, dropping task");
            return DispatchOutcome::NoNodes;
        };

        let assignment = task.assign_to(node_id.clone());
        let result = match encode(&assignment) {
            Ok(payload) => {
                self.publisher
                    .publish(TASK_QUEUE, &payload, DeliveryMode::Persistent)
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    task_id = %assignment.task_id(),
                    node_id = %node_id,
                    "Task dispatched",
                );
                DispatchOutcome::Published { node_id }
            }
            Err(error) => {
                tracing::error!(
                    task_id = %assignment.task_id(),
                    node_id = %node_id,
                    error = %error,
                    "Failed to publish assignment",
                );
                DispatchOutcome::PublishFailed { node_id, error }
            }
        }
    }
}
