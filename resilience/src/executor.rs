use std::future::Future;
use std::sync::Arc;

use error_common::{AuditError, AuditResult};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::circuit::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats};
use crate::retry::{retry_exhausted, RetryConfig};

/// Executes operations under retry and circuit breaking.
///
/// Cheap to clone; all clones share one breaker registry.
#[derive(Clone)]
pub struct ResilientExecutor {
    retry: RetryConfig,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ResilientExecutor {
    pub fn new(retry: RetryConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            retry,
            breakers: Arc::new(CircuitBreakerRegistry::new(breaker)),
        }
    }

    /// Run `op` under the policy for the given `endpoint:method` key.
    ///
    /// Retryable failures back off with full jitter until `maxAttempts`;
    /// exhaustion yields `RetryExhausted` wrapping the final cause.
    /// Breaker rejections surface as `CircuitOpen` without invoking `op`.
    pub async fn execute<T, F, Fut>(&self, key: &str, op: F) -> AuditResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AuditResult<T>>,
    {
        let (_tx, rx) = watch::channel(false);
        self.execute_with_cancel(key, op, rx).await
    }

    /// [`execute`](Self::execute) with a cancellation signal. A signalled
    /// receiver aborts the loop before the next attempt.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        key: &str,
        op: F,
        mut cancel: watch::Receiver<bool>,
    ) -> AuditResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AuditResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if *cancel.borrow() {
                return Err(AuditError::internal("operation cancelled")
                    .with_metadata("attempts", attempt.to_string()));
            }

            self.breakers.before_call(key)?;

            match op().await {
                Ok(value) => {
                    self.breakers.record_success(key);
                    if attempt > 1 {
                        debug!(key, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.breakers.record_failure(key);

                    if !self.retry.is_retryable(&err) {
                        return Err(err);
                    }
                    if attempt >= self.retry.max_attempts {
                        return Err(retry_exhausted(attempt, err));
                    }

                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        key,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.changed() => {
                            if *cancel.borrow() {
                                return Err(AuditError::internal("operation cancelled")
                                    .with_metadata("attempts", attempt.to_string()));
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn breaker_stats(&self, key: &str) -> Option<CircuitBreakerStats> {
        self.breakers.stats(key)
    }

    pub fn all_breaker_stats(&self) -> Vec<(String, CircuitBreakerStats)> {
        self.breakers.all_stats()
    }
}
