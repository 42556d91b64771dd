//! Startup announcement of a worker.

use taskmesh_broker::{DeliveryMode, Publisher};
use taskmesh_core::ledger::LedgerClient;
use taskmesh_core::queues::REGISTRATION_QUEUE;
use taskmesh_core::task::{encode, WorkerIdentity};

use crate::error::NodeError;

/// Make sure the worker is an active node on the ledger, registering it
/// if needed, then publish its identity to the registration queue.
///
/// The registration message is transient: the control plane only needs
/// it while both sides are running.
pub async fn announce(
    identity: &WorkerIdentity,
    ledger: &dyn LedgerClient,
    publisher: &dyn Publisher,
) -> Result<(), NodeError> {
    if ledger.is_node_active(ledger.address()).await? {
        tracing::info!(node_id = %identity.node_id, "Node already registered on ledger");
    } else {
        tracing::info!(
            node_id = %identity.node_id,
            node_name = %identity.node_name,
            "Registering node on ledger",
        );
        let confirmation = ledger.register_node(&identity.node_name).await?;
        tracing::info!(tx_id = %confirmation.tx_id, "Node registered on ledger");
    }

    publisher
        .publish(REGISTRATION_QUEUE, &encode(identity)?, DeliveryMode::Transient)
        .await?;
    tracing::info!(
        node_id = %identity.node_id,
        address = %identity.address,
        "Node announced to control plane",
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use taskmesh_broker::BrokerError;
    use taskmesh_core::ledger::LedgerError;
    use taskmesh_core::task::decode;
    use taskmesh_ledger::MemoryLedger;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>, DeliveryMode)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(
            &self,
            queue: &str,
            payload: &[u8],
            mode: DeliveryMode,
        ) -> Result<(), BrokerError> {
            self.published
                .lock()
                .unwrap()
                .push((queue.to_string(), payload.to_vec(), mode));
            Ok(())
        }
    }

    #[tokio::test]
    async fn registers_then_publishes_identity() {
        let ledger = MemoryLedger::new();
        let client = ledger.client("0xw1");
        let publisher = RecordingPublisher::default();
        let identity = WorkerIdentity::new("w1", "AI_Node", "0xw1");

        announce(&identity, &client, &publisher).await.unwrap();

        assert!(ledger.node_stats("0xw1").unwrap().active);
        let published = publisher.published.lock().unwrap();
        let (queue, payload, mode) = &published[0];
        assert_eq!(queue, REGISTRATION_QUEUE);
        assert_eq!(*mode, DeliveryMode::Transient);
        assert_eq!(decode::<WorkerIdentity>(payload).unwrap(), identity);
    }

    #[tokio::test]
    async fn skips_ledger_registration_when_active() {
        let ledger = MemoryLedger::new();
        let client = ledger.client("0xw1");
        client.register_node("AI_Node").await.unwrap();
        let publisher = RecordingPublisher::default();

        announce(&WorkerIdentity::new("w1", "AI_Node", "0xw1"), &client, &publisher)
            .await
            .unwrap();

        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_stops_announcement() {
        let ledger = MemoryLedger::new();
        ledger.set_unavailable(true);
        let publisher = RecordingPublisher::default();

        let err = announce(
            &WorkerIdentity::new("w1", "AI_Node", "0xw1"),
            &ledger.client("0xw1"),
            &publisher,
        )
        .await
        .unwrap_err();

        assert_matches!(err, NodeError::Ledger(LedgerError::Unavailable(_)));
        assert!(publisher.published.lock().unwrap().is_empty());
    }
}
