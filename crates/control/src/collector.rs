//! Consumes completion messages from the result queue.

use async_trait::async_trait;
use taskmesh_broker::{DeliveryHandler, Disposition};
use taskmesh_core::task::{decode, TaskResult};
use tokio::sync::broadcast;

/// Broadcast channel capacity for collected results.
const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Validates and reports task results.
///
/// Well-formed results are logged, published to subscribers and acked.
/// Anything that does not parse as a [`TaskResult`] is rejected without
/// requeue so it cannot block the queue.
pub struct ResultCollector {
    results: broadcast::Sender<TaskResult>,
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCollector {
    pub fn new() -> Self {
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        Self { results }
    }

    /// Receive every result collected from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskResult> {
        self.results.subscribe()
    }
}

#[async_trait]
impl DeliveryHandler for ResultCollector {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        match decode::<TaskResult>(payload) {
            Ok(result) => {
                tracing::info!(
                    task_id = %result.task_id,
                    node_id = %result.node_id,
                    answer = %result.answer,
                    completed_at = %result.completed_at,
                    "Task result received",
                );
                let _ = self.results.send(result);
                Disposition::Ack
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "Discarding malformed task result");
                Disposition::DISCARD
            }
        }
    }
}
