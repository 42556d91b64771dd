//! Integration tests for a worker node running against the in-process
//! broker and ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use taskmesh_broker::{
    ConnectionManager, ConnectionOptions, DeliveryMode, MemoryBroker, Publisher, ReconnectPolicy,
};
use taskmesh_core::inference::{InferenceClient, InferenceError};
use taskmesh_core::ledger::{LedgerClient, LedgerTaskState};
use taskmesh_core::queues::{REGISTRATION_QUEUE, RESULT_QUEUE, TASK_QUEUE};
use taskmesh_core::task::{decode, encode, Task, TaskResult, WorkerIdentity};
use taskmesh_ledger::MemoryLedger;
use taskmesh_node::{NodeConfig, NodeError, WorkerNode};

const ADDRESS: &str = "0xabcdef0123456789";

struct Echo;

#[async_trait]
impl InferenceClient for Echo {
    async fn answer(&self, question: &str) -> Result<String, InferenceError> {
        Ok(format!("answer to {question}"))
    }
}

/// Never answers. Records when the pending call is dropped.
struct Hang {
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceClient for Hang {
    async fn answer(&self, _question: &str) -> Result<String, InferenceError> {
        let _flag = DropFlag(Arc::clone(&self.dropped));
        std::future::pending().await
    }
}

fn config() -> NodeConfig {
    NodeConfig {
        node_id: Some("w1".into()),
        ..NodeConfig::default()
    }
}

async fn start_node(broker: &MemoryBroker, ledger: &MemoryLedger) -> WorkerNode {
    start_node_with(broker, ledger, Arc::new(Echo)).await
}

async fn start_node_with(
    broker: &MemoryBroker,
    ledger: &MemoryLedger,
    inference: Arc<dyn InferenceClient>,
) -> WorkerNode {
    WorkerNode::start(
        &config(),
        broker.connector(),
        ReconnectPolicy::default(),
        Arc::new(ledger.client(ADDRESS)),
        inference,
    )
    .await
    .expect("worker should start")
}

async fn control_side(broker: &MemoryBroker) -> Arc<ConnectionManager> {
    let manager = ConnectionManager::new(broker.connector(), ConnectionOptions::new("control"));
    manager.connect().await.unwrap();
    manager
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

// ---------------------------------------------------------------------------
// Test: startup
// ---------------------------------------------------------------------------

/// Starting registers the node on the ledger and announces its identity.
#[tokio::test]
async fn start_registers_and_announces() {
    let broker = MemoryBroker::new();
    let ledger = MemoryLedger::new();

    let node = start_node(&broker, &ledger).await;

    let stats = ledger.node_stats(ADDRESS).expect("node should be registered");
    assert!(stats.active);
    assert_eq!(stats.name, "AI_Node");

    let announced = broker.peek(REGISTRATION_QUEUE);
    assert_eq!(announced.len(), 1);
    let identity: WorkerIdentity = decode(&announced[0]).unwrap();
    assert_eq!(identity, WorkerIdentity::new("w1", "AI_Node", ADDRESS));
    assert_eq!(node.identity(), &identity);

    node.shutdown().await;
}

/// A node already active on the ledger is not registered twice.
#[tokio::test]
async fn restart_skips_ledger_registration() {
    let broker = MemoryBroker::new();
    let ledger = MemoryLedger::new();
    ledger.client(ADDRESS).register_node("AI_Node").await.unwrap();

    let node = start_node(&broker, &ledger).await;
    assert_eq!(broker.peek(REGISTRATION_QUEUE).len(), 1);

    node.shutdown().await;
}

/// An unreachable broker fails startup once the retry budget is spent.
#[tokio::test(start_paused = true)]
async fn unreachable_broker_fails_startup() {
    let broker = MemoryBroker::new();
    broker.set_offline(true);
    let ledger = MemoryLedger::new();

    let result = WorkerNode::start(
        &config(),
        broker.connector(),
        ReconnectPolicy::default(),
        Arc::new(ledger.client(ADDRESS)),
        Arc::new(Echo),
    )
    .await;

    assert_matches!(result, Err(NodeError::Broker(_)));
    assert_eq!(broker.connect_count(), 5);
    assert!(ledger.node_stats(ADDRESS).is_none());
}

// ---------------------------------------------------------------------------
// Test: processing
// ---------------------------------------------------------------------------

/// An assignment addressed to the node is claimed, answered, completed on
/// the ledger and published as a result.
#[tokio::test]
async fn assignment_produces_result() {
    let broker = MemoryBroker::new();
    let ledger = MemoryLedger::new();
    let node = start_node(&broker, &ledger).await;
    let control = control_side(&broker).await;

    let assignment = Task::from(ledger.create_task("2+2?")).assign_to("w1");
    control
        .publish(TASK_QUEUE, &encode(&assignment).unwrap(), DeliveryMode::Persistent)
        .await
        .unwrap();

    eventually("result published", || broker.ready_count(RESULT_QUEUE) == 1).await;
    let result: TaskResult = decode(&broker.peek(RESULT_QUEUE)[0]).unwrap();
    assert_eq!(result.task_id, "1");
    assert_eq!(result.node_id, "w1");
    assert_eq!(result.answer, "answer to 2+2?");

    assert_eq!(
        ledger.task_state("1"),
        Some(LedgerTaskState::Completed {
            address: ADDRESS.into(),
            answer: "answer to 2+2?".into(),
        })
    );
    assert_eq!(ledger.node_stats(ADDRESS).unwrap().tasks_completed, 1);
    eventually("assignment acked", || {
        broker.ready_count(TASK_QUEUE) == 0 && broker.unacked_count(TASK_QUEUE) == 0
    })
    .await;

    node.shutdown().await;
    control.shutdown().await;
}

/// After a broker restart the node reconnects and resumes consuming.
#[tokio::test(start_paused = true)]
async fn consumption_resumes_after_broker_restart() {
    let broker = MemoryBroker::new();
    let ledger = MemoryLedger::new();
    let node = start_node(&broker, &ledger).await;

    broker.restart();
    let assignment = Task::from(ledger.create_task("still there?")).assign_to("w1");

    // One reconnect delay later the node has a fresh channel.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(broker.connect_count() >= 2);
    let control = control_side(&broker).await;
    control
        .publish(TASK_QUEUE, &encode(&assignment).unwrap(), DeliveryMode::Persistent)
        .await
        .unwrap();

    eventually("result published", || broker.ready_count(RESULT_QUEUE) == 1).await;
    assert_matches!(
        ledger.task_state("1"),
        Some(LedgerTaskState::Completed { .. })
    );

    node.shutdown().await;
    control.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

/// A stuck assignment does not outlive shutdown: the consumer is aborted
/// after the grace period and the unsettled assignment returns to the queue.
#[tokio::test(start_paused = true)]
async fn shutdown_aborts_stuck_assignment() {
    let broker = MemoryBroker::new();
    let ledger = MemoryLedger::new();
    let dropped = Arc::new(AtomicBool::new(false));
    let node = start_node_with(
        &broker,
        &ledger,
        Arc::new(Hang {
            dropped: Arc::clone(&dropped),
        }),
    )
    .await;
    let control = control_side(&broker).await;

    let assignment = Task::from(ledger.create_task("forever?")).assign_to("w1");
    control
        .publish(TASK_QUEUE, &encode(&assignment).unwrap(), DeliveryMode::Persistent)
        .await
        .unwrap();
    eventually("task claimed", || {
        matches!(ledger.task_state("1"), Some(LedgerTaskState::Assigned { .. }))
    })
    .await;

    node.shutdown().await;

    assert!(dropped.load(Ordering::SeqCst), "in-flight inference should be dropped");
    assert_eq!(broker.ready_count(TASK_QUEUE), 1);

    control.shutdown().await;
}
