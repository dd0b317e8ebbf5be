//! Bounded exponential-backoff retry for remote calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use super::{OperationKind, RemoteError, RemotePolicy};

/// Runs `op` up to `policy.max_retries` times with exponential backoff.
///
/// Attempt `k` (1-based) sleeps `retry_delay × 2^(k-1)` before the next
/// attempt when it fails transiently and attempts remain. Permanent
/// (4xx-class) failures are never retried. Each attempt is bounded by
/// `policy.call_timeout`; an elapsed timeout counts as transient.
pub(crate) async fn run_with_retry<T, F, Fut>(
    policy: &RemotePolicy,
    kind: OperationKind,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 1u32;
    loop {
        let outcome = match timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(format!(
                "{kind} call timed out after {:?}",
                policy.call_timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err @ RemoteError::Permanent(_)) => return Err(err),
            Err(err @ RemoteError::CircuitOpen(_)) => return Err(err),
            Err(err) => {
                if attempt >= attempts {
                    return Err(err);
                }
                let delay = backoff_delay(policy.retry_delay, attempt);
                warn!(
                    %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient remote failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Delay before the attempt following failed attempt `attempt` (1-based):
/// `retry_delay × 2^(attempt-1)`.
fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay * 2u32.saturating_pow(attempt - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RemotePolicy {
        RemotePolicy::default()
            .with_max_retries(3)
            .with_retry_delay(Duration::from_millis(1000))
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_wait_1s_then_2s() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();

        let result: Result<(), RemoteError> =
            run_with_retry(&policy(), OperationKind::Embed, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RemoteError::Transient("503".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms after attempt 1, 2000ms after attempt 2, none after the last.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried_and_does_not_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();

        let result: Result<(), RemoteError> =
            run_with_retry(&policy(), OperationKind::Embed, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RemoteError::Permanent("400".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn success_at_any_attempt_wins() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = run_with_retry(&policy(), OperationKind::Embed, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::Transient("timeout".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_are_cut_off_as_transient() {
        let policy = policy().with_call_timeout(Duration::from_millis(50));

        let result: Result<(), RemoteError> =
            run_with_retry(&policy, OperationKind::Ocr, move || async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Transient(_))));
    }
}
