use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weftcore::{RetryPolicy, ServiceError, VertexError};

/// Delay before retry number `attempt` (1-based), with 0.8x to 1.2x jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base = policy.delay_ms as f64 * policy.backoff_multiplier.max(1.0).powi(exponent);
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((base * jitter) as u64)
}

/// Sleep for `delay` unless cancelled first.
pub async fn pause(delay: Duration, cancellation: &CancellationToken) -> Result<(), VertexError> {
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(VertexError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run a backend call under `policy`. Retryable failures are retried with
/// backoff; everything else is returned as is.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancellation: &CancellationToken,
    operation: &str,
    mut call: F,
) -> Result<T, VertexError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(VertexError::Cancelled),
            result = call() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(ServiceError::Cancelled) => return Err(VertexError::Cancelled),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt,
                    max_attempts,
                    delay,
                    e
                );
                pause(delay, cancellation).await?;
                attempt += 1;
            }
            Err(e) => return Err(VertexError::ModelCall(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_ms: 1,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_within_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        let third = backoff_delay(&policy, 3).as_millis();
        assert!((320..=480).contains(&third), "{}", third);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_policy(3), &CancellationToken::new(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ServiceError::Transport("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            call_with_retry(&fast_policy(3), &CancellationToken::new(), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ServiceError::Provider {
                        status: 400,
                        message: "bad request".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(VertexError::ModelCall(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
