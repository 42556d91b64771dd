//! In-process task ledger.
//!
//! [`MemoryLedger`] holds the shared ledger state; each worker talks to it
//! through a [`MemoryLedgerClient`] bound to that worker's address, the
//! same way an on-chain client is bound to a signing wallet.
//!
//! `TaskCreated` events are fanned out via a [`tokio::sync::broadcast`]
//! channel. Subscribers that fall behind see [`LedgerError::Lagged`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use futures::StreamExt;
use indexmap::IndexMap;
use taskmesh_core::ledger::{
    Confirmation, LedgerClient, LedgerError, LedgerTaskState, NodeStats, TaskCreated,
    TaskCreatedStream,
};
use taskmesh_core::types::{TaskId, Timestamp};
use tokio::sync::broadcast;

/// Buffer capacity of the `TaskCreated` feed.
const FEED_CAPACITY: usize = 256;

/// Shared in-process ledger. Clones share state.
#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<LedgerState>,
    /// `None` once the feed has been closed.
    feed: Mutex<Option<broadcast::Sender<TaskCreated>>>,
    unavailable: AtomicBool,
    /// Number of `assign` and `complete` calls received.
    writes: AtomicU64,
}

#[derive(Default)]
struct LedgerState {
    tasks: IndexMap<TaskId, TaskRecord>,
    nodes: IndexMap<String, NodeStats>,
    next_task_id: u64,
}

struct TaskRecord {
    state: LedgerTaskState,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LedgerState::default()),
                feed: Mutex::new(Some(sender)),
                unavailable: AtomicBool::new(false),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// A client that signs as `address`.
    pub fn client(&self, address: impl Into<String>) -> MemoryLedgerClient {
        MemoryLedgerClient {
            address: address.into(),
            ledger: self.clone(),
        }
    }

    /// Record a new task and emit `TaskCreated` for it. Task ids are
    /// sequential decimal strings starting at `"1"`.
    pub fn create_task(&self, question: &str) -> TaskCreated {
        let event = {
            let mut state = self.inner.lock();
            state.next_task_id += 1;
            let task_id = state.next_task_id.to_string();
            state.tasks.insert(
                task_id.clone(),
                TaskRecord {
                    state: LedgerTaskState::Created,
                },
            );
            TaskCreated {
                task_id,
                question: question.to_string(),
                timestamp: block_time(),
            }
        };

        tracing::debug!(task_id = %event.task_id, "Ledger task created");
        if let Some(feed) = self.inner.feed().as_ref() {
            // No subscribers is fine.
            let _ = feed.send(event.clone());
        }
        event
    }

    pub fn task_state(&self, task_id: &str) -> Option<LedgerTaskState> {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .map(|record| record.state.clone())
    }

    pub fn node_stats(&self, address: &str) -> Option<NodeStats> {
        self.inner.lock().nodes.get(address).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Number of `assign` and `complete` calls made by any client,
    /// including reverted ones.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// While unavailable every client call fails with
    /// [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stop emitting events. Existing subscriptions end once drained.
    pub fn close_feed(&self) {
        self.inner.feed().take();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .feed()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn feed(&self) -> MutexGuard<'_, Option<broadcast::Sender<TaskCreated>>> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LedgerError::Unavailable("ledger offline".into()))
        } else {
            Ok(())
        }
    }

    fn ensure_active(state: &LedgerState, caller: &str) -> Result<(), LedgerError> {
        match state.nodes.get(caller) {
            Some(node) if node.active => Ok(()),
            _ => Err(LedgerError::Reverted(format!(
                "{caller} is not an active node"
            ))),
        }
    }

    fn assign(&self, caller: &str, task_id: &str) -> Result<Confirmation, LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut state = self.lock();
        Self::ensure_active(&state, caller)?;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| LedgerError::UnknownTask(task_id.to_string()))?;

        match &record.state {
            LedgerTaskState::Created => {
                record.state = LedgerTaskState::Assigned {
                    address: caller.to_string(),
                };
            }
            LedgerTaskState::Assigned { address } if address == caller => {}
            LedgerTaskState::Assigned { .. } => {
                return Err(LedgerError::Reverted(format!(
                    "task {task_id} already assigned"
                )));
            }
            LedgerTaskState::Completed { .. } => {
                return Err(LedgerError::Reverted(format!(
                    "task {task_id} already completed"
                )));
            }
        }

        tracing::debug!(task_id, address = caller, "Ledger task assigned");
        Ok(confirmation())
    }

    fn complete(
        &self,
        caller: &str,
        task_id: &str,
        answer: &str,
    ) -> Result<Confirmation, LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut guard = self.lock();
        let state = &mut *guard;
        Self::ensure_active(state, caller)?;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| LedgerError::UnknownTask(task_id.to_string()))?;

        match &record.state {
            LedgerTaskState::Assigned { address } if address == caller => {}
            LedgerTaskState::Completed { .. } => {
                return Err(LedgerError::Reverted(format!(
                    "task {task_id} already completed"
                )));
            }
            _ => {
                return Err(LedgerError::Reverted(format!(
                    "task {task_id} is not assigned to {caller}"
                )));
            }
        }

        record.state = LedgerTaskState::Completed {
            address: caller.to_string(),
            answer: answer.to_string(),
        };
        if let Some(node) = state.nodes.get_mut(caller) {
            node.tasks_completed += 1;
        }

        tracing::debug!(task_id, address = caller, "Ledger task completed");
        Ok(confirmation())
    }

    fn register(&self, caller: &str, name: &str) -> Result<Confirmation, LedgerError> {
        self.ensure_available()?;

        let mut state = self.lock();
        if state.nodes.get(caller).is_some_and(|node| node.active) {
            return Err(LedgerError::Reverted(format!(
                "{caller} is already registered"
            )));
        }
        state.nodes.insert(
            caller.to_string(),
            NodeStats {
                name: name.to_string(),
                address: caller.to_string(),
                registered_at: block_time(),
                tasks_completed: 0,
                active: true,
            },
        );

        tracing::debug!(address = caller, name, "Ledger node registered");
        Ok(confirmation())
    }
}

/// Current time at the ledger's one-second resolution.
fn block_time() -> Timestamp {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

fn confirmation() -> Confirmation {
    Confirmation {
        tx_id: format!("0x{}", uuid::Uuid::new_v4().simple()),
    }
}

/// [`LedgerClient`] bound to one address of a [`MemoryLedger`].
#[derive(Clone)]
pub struct MemoryLedgerClient {
    address: String,
    ledger: MemoryLedger,
}

impl MemoryLedgerClient {
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

#[async_trait]
impl LedgerClient for MemoryLedgerClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe_task_created(&self) -> Result<TaskCreatedStream, LedgerError> {
        self.ledger.inner.ensure_available()?;
        let receiver = self
            .ledger
            .inner
            .feed()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| LedgerError::Unavailable("event feed closed".into()))?;

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    Some((Err(LedgerError::Lagged(n)), receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }

    async fn task_state(&self, task_id: &str) -> Result<LedgerTaskState, LedgerError> {
        self.ledger.inner.ensure_available()?;
        self.ledger
            .task_state(task_id)
            .ok_or_else(|| LedgerError::UnknownTask(task_id.to_string()))
    }

    async fn assign(&self, task_id: &str) -> Result<Confirmation, LedgerError> {
        self.ledger.inner.assign(&self.address, task_id)
    }

    async fn complete(&self, task_id: &str, answer: &str) -> Result<Confirmation, LedgerError> {
        self.ledger.inner.complete(&self.address, task_id, answer)
    }

    async fn node_stats(&self, address: &str) -> Result<NodeStats, LedgerError> {
        self.ledger.inner.ensure_available()?;
        self.ledger
            .node_stats(address)
            .ok_or_else(|| LedgerError::UnknownNode(address.to_string()))
    }

    async fn is_node_active(&self, address: &str) -> Result<bool, LedgerError> {
        self.ledger.inner.ensure_available()?;
        Ok(self
            .ledger
            .node_stats(address)
            .is_some_and(|node| node.active))
    }

    async fn register_node(&self, name: &str) -> Result<Confirmation, LedgerError> {
        self.ledger.inner.register(&self.address, name)
    }

    async fn create_task(&self, question: &str) -> Result<TaskId, LedgerError> {
        self.ledger.inner.ensure_available()?;
        Ok(self.ledger.create_task(question).task_id)
    }
}
