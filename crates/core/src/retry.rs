//! Retry-with-backoff helper for idempotent reads (§4.1 algorithms).

use crate::error::UpstreamError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// `min(1000 * 2^attempt, 10_000) ms` backoff, as specified.
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let ms = 1000u64.saturating_mul(1u64 << attempt.min(5));
    Duration::from_millis(ms.min(10_000))
}

/// Retry `op` up to `max_attempts` times. Only `UpstreamError::Transient`
/// failures are retried; a permanent error returns immediately.
pub async fn with_retry<T, F, Fut>(mut op: F, max_attempts: u32) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let delay = backoff_for_attempt(attempt);
                warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(backoff_for_attempt(10), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(UpstreamError::Transient("timeout".into()))
                } else {
                    Ok(42)
                }
            },
            5,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), UpstreamError> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::Permanent("bad request".into()))
            },
            5,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_repeated_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), UpstreamError> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::Transient("timeout".into()))
            },
            3,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
