//! Bounded joins for long-lived background tasks.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Wait up to `timeout` for `task` to finish; abort it otherwise.
///
/// Returns `true` if the task finished on its own. An aborted task has
/// been dropped by the time this returns.
pub async fn join_or_abort(name: &str, mut task: JoinHandle<()>, timeout: Duration) -> bool {
    if tokio::time::timeout(timeout, &mut task).await.is_ok() {
        return true;
    }

    tracing::warn!(task = name, "Background task did not stop in time, aborting");
    task.abort();
    let _ = task.await;
    false
}
