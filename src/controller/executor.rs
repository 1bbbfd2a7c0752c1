//! Single-call request execution with transparent throttling retry

use std::future::Future;
use std::time::Duration;

use crate::log_api_result;
use crate::model::ApiFailure;

/// Runs one outbound call at a time and resubmits it while the catalog throttles.
///
/// Holds no state between calls besides the configured cooldown.
#[derive(Clone, Debug)]
pub struct RequestExecutor {
    cooldown: Duration,
}

impl RequestExecutor {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// Execute `request`, retrying the same request after the cooldown for as long as
    /// it comes back [`ApiFailure::Throttled`]. Every other outcome is returned as-is,
    /// `Unauthorized` included.
    pub async fn execute<T, F, Fut>(&self, operation: &'static str, request: F) -> Result<T, ApiFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiFailure>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let result = request().await;
            match result {
                Err(ApiFailure::Throttled { retry_after }) => {
                    let wait = retry_after.unwrap_or(self.cooldown);
                    tracing::warn!(
                        operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Throttled, retrying after cooldown"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => {
                    log_api_result!(operation, other);
                    if attempt > 1 {
                        tracing::debug!(operation, attempts = attempt, "Request settled after throttling");
                    }
                    return other;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn throttled() -> ApiFailure {
        ApiFailure::Throttled { retry_after: None }
    }

    #[tokio::test]
    async fn retries_the_same_request_until_it_succeeds() {
        let executor = RequestExecutor::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 3 { Err(throttled()) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let executor = RequestExecutor::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = executor
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiFailure::Unauthorized) }
            })
            .await;

        assert_eq!(result, Err(ApiFailure::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_failures_are_returned_after_one_attempt() {
        let executor = RequestExecutor::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = executor
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiFailure::Other { status: 500, body: String::new() }) }
            })
            .await;

        assert!(matches!(result, Err(ApiFailure::Other { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_hint_beats_the_cooldown() {
        let executor = RequestExecutor::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let result = executor
            .execute("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ApiFailure::Throttled { retry_after: Some(Duration::from_millis(10)) })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
