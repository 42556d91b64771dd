//! End-to-end tests: ledger event to collected result through the
//! in-process broker.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use taskmesh_broker::{BrokerConfig, ReconnectPolicy};
use taskmesh_core::inference::{InferenceClient, InferenceError};
use taskmesh_core::ledger::LedgerTaskState;
use taskmesh_core::queues::{RESULT_QUEUE, TASK_QUEUE};
use taskmesh_daemon::{Devnet, DevnetConfig};
use taskmesh_node::NodeConfig;

struct Four;

#[async_trait]
impl InferenceClient for Four {
    async fn answer(&self, _question: &str) -> Result<String, InferenceError> {
        Ok("4".into())
    }
}

fn config(node_count: usize, node_id: &str) -> DevnetConfig {
    DevnetConfig {
        node_count,
        broker: BrokerConfig {
            backend: taskmesh_broker::BrokerBackend::Memory,
            policy: ReconnectPolicy::default(),
        },
        node: NodeConfig {
            node_id: Some(node_id.into()),
            ..NodeConfig::default()
        },
    }
}

/// Poll `check` until it holds, failing after two seconds.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// A task created on the ledger is assigned to the only node, answered,
/// completed on the ledger and collected.
#[tokio::test]
async fn ledger_task_is_answered_and_collected() {
    let devnet = Devnet::start(&config(1, "w1"), Arc::new(Four))
        .await
        .expect("network should start");
    assert_eq!(devnet.control_plane().registry().list_nodes().await, vec!["w1"]);
    let mut results = devnet.results();

    let created = devnet.submit("2+2?");
    assert_eq!(created.task_id, "1");

    let result = tokio::time::timeout(Duration::from_secs(2), results.recv())
        .await
        .expect("result should be collected")
        .unwrap();
    assert_eq!(result.task_id, "1");
    assert_eq!(result.node_id, "w1");
    assert_eq!(result.answer, "4");
    assert!(result.completed_at.timestamp() >= created.timestamp.timestamp());

    assert_matches!(
        devnet.ledger().task_state("1"),
        Some(LedgerTaskState::Completed { ref answer, .. }) if answer == "4"
    );

    let broker = devnet.broker().clone();
    eventually("queues drained", || {
        broker.ready_count(TASK_QUEUE) == 0
            && broker.unacked_count(TASK_QUEUE) == 0
            && broker.ready_count(RESULT_QUEUE) == 0
            && broker.unacked_count(RESULT_QUEUE) == 0
    })
    .await;

    devnet.shutdown().await;
}

/// Every started worker is registered before `start` returns.
#[tokio::test]
async fn start_waits_for_every_registration() {
    let devnet = Devnet::start(&config(3, "gpu"), Arc::new(Four))
        .await
        .expect("network should start");

    assert_eq!(
        devnet.control_plane().registry().list_nodes().await.len(),
        3
    );
    let mut ids: Vec<&str> = devnet
        .nodes()
        .iter()
        .map(|node| node.identity().node_id.as_str())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, ["gpu-1", "gpu-2", "gpu-3"]);

    devnet.shutdown().await;
}

/// Successive tasks each produce a result in ledger order.
#[tokio::test]
async fn successive_tasks_are_all_collected() {
    let devnet = Devnet::start(&config(1, "w1"), Arc::new(Four))
        .await
        .expect("network should start");
    let mut results = devnet.results();

    for question in ["a?", "b?", "c?"] {
        devnet.submit(question);
    }

    let mut ids = Vec::new();
    for _ in 0..3 {
        let result = tokio::time::timeout(Duration::from_secs(2), results.recv())
            .await
            .expect("result should be collected")
            .unwrap();
        ids.push(result.task_id);
    }
    assert_eq!(ids, ["1", "2", "3"]);
    assert_eq!(
        devnet
            .ledger()
            .node_stats(&devnet.nodes()[0].identity().address)
            .unwrap()
            .tasks_completed,
        3
    );

    devnet.shutdown().await;
}
