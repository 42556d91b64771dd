//! Integration tests for ledger arbitration between competing workers.

use std::sync::Arc;

use taskmesh_core::ledger::{LedgerClient, LedgerTaskState};
use taskmesh_ledger::MemoryLedger;

// ---------------------------------------------------------------------------
// Test: concurrent assign
// ---------------------------------------------------------------------------

/// When several workers race to assign the same task, exactly one wins and
/// the ledger records that worker.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_racing_worker_wins_assignment() {
    let ledger = MemoryLedger::new();
    let mut clients = Vec::new();
    for i in 0..8 {
        let client = Arc::new(ledger.client(format!("0xw{i}")));
        client.register_node(&format!("node-{i}")).await.unwrap();
        clients.push(client);
    }
    let task = ledger.create_task("who gets it?");

    let mut handles = Vec::new();
    for client in &clients {
        let client = Arc::clone(client);
        let task_id = task.task_id.clone();
        handles.push(tokio::spawn(async move {
            client.assign(&task_id).await.map(|_| client.address().to_string())
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Ok(address) = handle.await.unwrap() {
            winners.push(address);
        }
    }

    assert_eq!(winners.len(), 1, "exactly one assign must succeed");
    assert_eq!(
        ledger.task_state(&task.task_id),
        Some(LedgerTaskState::Assigned {
            address: winners[0].clone()
        })
    );
}

/// Completing a task bumps only the completing node's counter.
#[tokio::test]
async fn completion_counters_are_per_node() {
    let ledger = MemoryLedger::new();
    let w1 = ledger.client("0xw1");
    let w2 = ledger.client("0xw2");
    w1.register_node("one").await.unwrap();
    w2.register_node("two").await.unwrap();

    for _ in 0..3 {
        let task = ledger.create_task("q");
        w1.assign(&task.task_id).await.unwrap();
        w1.complete(&task.task_id, "a").await.unwrap();
    }

    assert_eq!(w2.node_stats("0xw1").await.unwrap().tasks_completed, 3);
    assert_eq!(w2.node_stats("0xw2").await.unwrap().tasks_completed, 0);
}
