//! Set of workers available for assignment.
//!
//! Membership is append-only: there is no deregistration, so a worker
//! that goes away keeps receiving its share of assignments.

use indexmap::IndexMap;
use taskmesh_core::task::WorkerIdentity;
use taskmesh_core::types::NodeId;
use tokio::sync::RwLock;

/// Known workers in registration order.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<IndexMap<NodeId, Option<WorkerIdentity>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `node_id` if unknown. Returns `true` if it was added.
    pub async fn register(&self, node_id: impl Into<NodeId>) -> bool {
        let node_id = node_id.into();
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node_id) {
            return false;
        }
        tracing::info!(node_id = %node_id, total = nodes.len() + 1, "Node registered");
        nodes.insert(node_id, None);
        true
    }

    /// Add a worker with its full identity. Returns `true` if the node id
    /// was new. A known id keeps its position but has its identity
    /// refreshed.
    pub async fn register_identity(&self, identity: WorkerIdentity) -> bool {
        let mut nodes = self.nodes.write().await;
        let added = !nodes.contains_key(&identity.node_id);
        if added {
            tracing::info!(
                node_id = %identity.node_id,
                node_name = %identity.node_name,
                address = %identity.address,
                total = nodes.len() + 1,
                "Node registered",
            );
        }
        nodes.insert(identity.node_id.clone(), Some(identity));
        added
    }

    /// Node ids in stable insertion order.
    pub async fn list_nodes(&self) -> Vec<NodeId> {
        self.nodes.read().await.keys().cloned().collect()
    }

    pub async fn current_size(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Full identity of `node_id`, if it registered with one.
    pub async fn identity(&self, node_id: &str) -> Option<WorkerIdentity> {
        self.nodes.read().await.get(node_id).cloned().flatten()
    }
}
