//! Forwards ledger `TaskCreated` events to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use taskmesh_core::ledger::{LedgerClient, LedgerError, TaskCreatedStream};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

/// Pause after a feed error before polling the feed again.
const FEED_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Subscribes to the ledger feed and dispatches every new task, in ledger
/// order, with no buffering and no deduplication.
pub struct LedgerWatcher {
    feed: TaskCreatedStream,
    dispatcher: Arc<Dispatcher>,
}

impl LedgerWatcher {
    /// Subscribe now so that no event emitted after this call is missed.
    pub async fn subscribe(
        ledger: &dyn LedgerClient,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, LedgerError> {
        let feed = ledger.subscribe_task_created().await?;
        tracing::info!("Watching ledger for new tasks");
        Ok(Self { feed, dispatcher })
    }

    /// Dispatch tasks until `cancel` fires or the feed ends.
    ///
    /// Returns the number of events handled.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut handled = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.feed.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    tracing::info!(
                        task_id = %event.task_id,
                        question = %event.question,
                        "New task created on ledger",
                    );
                    self.dispatcher.dispatch(event.into()).await;
                    handled += 1;
                }
                Some(Err(LedgerError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Ledger watcher lagged, some tasks were not dispatched");
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Ledger event feed error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(FEED_ERROR_BACKOFF) => {}
                    }
                }
                None => {
                    tracing::info!("Ledger event feed closed, watcher shutting down");
                    break;
                }
            }
        }

        handled
    }
}
