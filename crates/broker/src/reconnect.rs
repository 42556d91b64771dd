//! Retry policies for establishing and re-establishing broker channels.
//!
//! Startup and mid-life failures are treated differently on purpose:
//! [`connect_with_budget`] gives up after a fixed number of attempts and
//! reports the failure to the caller, while [`reconnect_forever`] keeps
//! retrying at a fixed delay until it succeeds or is cancelled.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;

/// Tunable parameters for connecting and reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts made by the initial connect before giving up.
    pub startup_attempts: u32,
    /// Delay between failed initial connect attempts.
    pub startup_retry_delay: Duration,
    /// Delay before each attempt after a mid-life disconnect.
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            startup_attempts: 5,
            startup_retry_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Call `open` until it succeeds or `policy.startup_attempts` attempts
/// have failed.
///
/// Sleeps `startup_retry_delay` between attempts. Returns
/// [`BrokerError::RetriesExhausted`] carrying the last error once the
/// budget is spent, or [`BrokerError::Cancelled`] if `cancel` fires.
pub async fn connect_with_budget<T, F, Fut>(
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
    mut open: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let attempts = policy.startup_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match open().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let remaining = attempts - attempt;
        tracing::warn!(
            attempt,
            remaining,
            error = %err,
            "Failed to connect to broker",
        );
        if remaining == 0 {
            return Err(BrokerError::RetriesExhausted {
                attempts,
                last_error: err.to_string(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
            _ = tokio::time::sleep(policy.startup_retry_delay) => {}
        }
    }
}

/// Wait `reconnect_delay`, call `open`, and repeat until it succeeds.
///
/// There is no attempt ceiling. `on_attempt` is invoked with the 1-based
/// attempt number right before each call to `open`. Returns `None` if
/// `cancel` fires first.
pub async fn reconnect_forever<T, F, Fut, A>(
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
    mut open: F,
    mut on_attempt: A,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
    A: FnMut(u32),
{
    let mut attempt = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(policy.reconnect_delay) => {}
        }

        attempt += 1;
        on_attempt(attempt);

        match open().await {
            Ok(value) => {
                tracing::info!(attempt, "Reconnected to broker");
                return Some(value);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing_until(successful_call: u32) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<u32, BrokerError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let open = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= successful_call {
                Ok(n)
            } else {
                Err(BrokerError::Connection(format!("refused #{n}")))
            })
        };
        (calls, open)
    }

    #[test]
    fn default_policy_matches_documented_budget() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.startup_attempts, 5);
        assert_eq!(policy.startup_retry_delay, Duration::from_secs(5));
        assert_eq!(policy.reconnect_delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_succeeds_on_third_attempt() {
        let (calls, open) = failing_until(3);
        let started = tokio::time::Instant::now();

        let value = connect_with_budget(&ReconnectPolicy::default(), &CancellationToken::new(), open)
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_is_fatal() {
        let (calls, open) = failing_until(u32::MAX);

        let err = connect_with_budget(&ReconnectPolicy::default(), &CancellationToken::new(), open)
            .await
            .unwrap_err();

        assert_matches!(
            err,
            BrokerError::RetriesExhausted { attempts: 5, ref last_error } if last_error.contains("refused #5")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_observes_cancellation_between_attempts() {
        let (calls, open) = failing_until(u32::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connect_with_budget(&ReconnectPolicy::default(), &cancel, open)
            .await
            .unwrap_err();

        assert_matches!(err, BrokerError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_before_first_attempt() {
        let (calls, open) = failing_until(1);
        let started = tokio::time::Instant::now();
        let mut attempts_seen = Vec::new();

        let value = reconnect_forever(
            &ReconnectPolicy::default(),
            &CancellationToken::new(),
            open,
            |attempt| attempts_seen.push(attempt),
        )
        .await;

        assert_eq!(value, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(attempts_seen, vec![1]);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_has_no_ceiling() {
        let (calls, open) = failing_until(12);

        let value = reconnect_forever(
            &ReconnectPolicy::default(),
            &CancellationToken::new(),
            open,
            |_| {},
        )
        .await;

        assert_eq!(value, Some(12));
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_reconnect() {
        let (calls, open) = failing_until(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let value = reconnect_forever(&ReconnectPolicy::default(), &cancel, open, |_| {}).await;

        assert!(value.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
