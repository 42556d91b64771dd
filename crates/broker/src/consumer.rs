//! Consumer loop that survives reconnects.
//!
//! [`run_consumer`] attaches a consumer to whatever channel the
//! [`ConnectionManager`] currently holds, feeds every delivery to a
//! [`DeliveryHandler`], and settles it according to the returned
//! [`Disposition`]. When the channel goes away it waits for the manager to
//! install the next generation and attaches again.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::{Delivery, DeliveryStream};
use crate::manager::{ChannelHandle, ConnectionManager};

/// How a delivery should be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

impl Disposition {
    pub const REQUEUE: Self = Self::Reject { requeue: true };
    pub const DISCARD: Self = Self::Reject { requeue: false };
}

/// Handles the payload of one delivery.
///
/// Handlers never see the delivery itself; the consumer loop settles it
/// once `handle` returns.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Disposition;
}

/// Consume `queue` until `cancel` fires.
///
/// Runs across any number of reconnects. A delivery that is being handled
/// when `cancel` fires is still handled and settled.
pub async fn run_consumer(
    manager: Arc<ConnectionManager>,
    queue: String,
    handler: Arc<dyn DeliveryHandler>,
    cancel: CancellationToken,
) {
    let mut cells = manager.subscribe();
    let mut min_generation = 1;
    let retry_delay = manager.policy().reconnect_delay;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = next_handle(&mut cells, min_generation) => next,
        };
        let Some(handle) = next else {
            // Manager dropped.
            break;
        };

        let tag = format!("{}.{}", manager.name(), uuid::Uuid::new_v4().simple());
        match handle.channel.consume(&queue, &tag).await {
            Ok(stream) => {
                tracing::info!(
                    queue = %queue,
                    consumer_tag = %tag,
                    generation = handle.generation,
                    "Consumer attached",
                );
                if drain(stream, &queue, handler.as_ref(), &cancel).await {
                    break;
                }
                tracing::info!(queue = %queue, generation = handle.generation, "Consumer detached");
            }
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "Failed to start consumer");
            }
        }

        if handle.channel.is_open() {
            // Consumer went away but the channel did not; try again on the
            // same channel after a pause.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        } else {
            min_generation = handle.generation + 1;
        }
    }

    tracing::debug!(queue = %queue, "Consumer loop exited");
}

/// Wait until the cell holds a handle of at least `min_generation`.
async fn next_handle(
    cells: &mut watch::Receiver<Option<ChannelHandle>>,
    min_generation: u64,
) -> Option<ChannelHandle> {
    let current = cells
        .wait_for(|cell| {
            cell.as_ref()
                .is_some_and(|handle| handle.generation >= min_generation)
        })
        .await
        .ok()?;
    (*current).clone()
}

/// Feed deliveries to `handler` until the stream ends. Returns `true` if
/// stopped by cancellation.
async fn drain(
    mut stream: DeliveryStream,
    queue: &str,
    handler: &dyn DeliveryHandler,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return true,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                let disposition = handler.handle(delivery.payload()).await;
                settle(delivery, disposition, queue).await;
            }
            Some(Err(e)) => {
                tracing::warn!(queue, error = %e, "Consumer stream failed");
                return false;
            }
            None => return false,
        }
    }
}

async fn settle(delivery: Delivery, disposition: Disposition, queue: &str) {
    let result = match disposition {
        Disposition::Ack => delivery.ack().await,
        Disposition::Reject { requeue } => delivery.reject(requeue).await,
    };
    if let Err(e) = result {
        // The broker redelivers unsettled messages once the channel is gone.
        tracing::warn!(queue, ?disposition, error = %e, "Failed to settle delivery");
    }
}
