//! Exponential backoff for remote calls.

use std::future::Future;

use taxa_core::config::RetryConfig;
use taxa_core::error::AppError;
use tokio::time::sleep;

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// attempts.
///
/// Errors for which [`AppError::is_retryable`] is false are returned at once.
/// Retryable errors are retried up to `policy.max_attempts` total calls, with
/// `policy.delay_for(attempt)` between consecutive calls. The last error is
/// returned once attempts are exhausted. A policy of zero attempts still
/// makes one call.
///
/// # Examples
///
/// ```no_run
/// use taxa_client::{with_retry, INatClient, TaxaApi};
/// use taxa_core::config::RetryConfig;
///
/// # async fn example() -> Result<(), taxa_core::AppError> {
/// let client = INatClient::new()?;
/// let policy = RetryConfig::default();
/// let page = with_retry(&policy, || client.list_taxa_page(47604, 1, 200, None)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, mut operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::error!(attempts = attempt, error = %e, "Giving up after retries");
                    return Err(e);
                }

                let delay = policy.delay_for(attempt - 1);
                tracing::info!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_exponential_delays() {
        let start = Instant::now();
        let calls = RefCell::new(Vec::new());

        let result = with_retry(&RetryConfig::default(), || {
            calls.borrow_mut().push(start.elapsed());
            let n = calls.borrow().len();
            async move {
                if n < 3 {
                    Err(AppError::NetworkError("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            *calls.borrow(),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_stops_at_max_attempts() {
        let calls = RefCell::new(0u32);

        let result: Result<(), AppError> = with_retry(&RetryConfig::default(), || {
            *calls.borrow_mut() += 1;
            async { Err(AppError::RateLimitExceeded) }
        })
        .await;

        assert!(matches!(result, Err(AppError::RateLimitExceeded)));
        assert_eq!(*calls.borrow(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_immediately() {
        let start = Instant::now();
        let calls = RefCell::new(0u32);

        let result: Result<(), AppError> = with_retry(&RetryConfig::default(), || {
            *calls.borrow_mut() += 1;
            async { Err(AppError::ClientError("HTTP 422".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::ClientError(_))));
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_by_max_delay() {
        let policy = RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(3),
        };
        let start = Instant::now();
        let calls = RefCell::new(0u32);

        let result: Result<(), AppError> = with_retry(&policy, || {
            *calls.borrow_mut() += 1;
            async { Err(AppError::Timeout(30)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 4);
        // 2s, then min(4s, 3s), then min(8s, 3s)
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let policy = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };

        let result = with_retry(&policy, || async { Ok::<_, AppError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
