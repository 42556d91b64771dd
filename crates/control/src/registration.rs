//! Feeds worker announcements from the registration queue into the
//! [`NodeRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use taskmesh_broker::{DeliveryHandler, Disposition};
use taskmesh_core::task::{decode, WorkerIdentity};

use crate::registry::NodeRegistry;

pub struct RegistrationListener {
    registry: Arc<NodeRegistry>,
}

impl RegistrationListener {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeliveryHandler for RegistrationListener {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        let identity = match decode::<WorkerIdentity>(payload) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed registration");
                return Disposition::DISCARD;
            }
        };
        if let Err(e) = identity.validate() {
            tracing::warn!(error = %e, node_id = %identity.node_id, "Discarding invalid registration");
            return Disposition::DISCARD;
        }

        let node_id = identity.node_id.clone();
        if !self.registry.register_identity(identity).await {
            tracing::debug!(node_id = %node_id, "Node re-announced");
        }
        Disposition::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_announced_worker() {
        let registry = Arc::new(NodeRegistry::new());
        let listener = RegistrationListener::new(Arc::clone(&registry));

        let payload = br#"{"nodeId":"w1","nodeName":"AI_Node","nodeAddress":"0xabc"}"#;
        assert_eq!(listener.handle(payload).await, Disposition::Ack);

        assert_eq!(registry.list_nodes().await, vec!["w1"]);
        assert_eq!(registry.identity("w1").await.unwrap().address, "0xabc");
    }

    #[tokio::test]
    async fn rejects_malformed_and_invalid_announcements() {
        let registry = Arc::new(NodeRegistry::new());
        let listener = RegistrationListener::new(Arc::clone(&registry));

        assert_eq!(listener.handle(b"not json").await, Disposition::DISCARD);
        let empty_id = br#"{"nodeId":" ","nodeName":"x","address":"0x1"}"#;
        assert_eq!(listener.handle(empty_id).await, Disposition::DISCARD);

        assert_eq!(registry.current_size().await, 0);
    }
}
