use std::time::Duration;

use error_common::AuditError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_errors: vec![
                "ECONNRESET".to_string(),
                "ECONNREFUSED".to_string(),
                "ETIMEDOUT".to_string(),
                "EPIPE".to_string(),
                "socket hang up".to_string(),
                "network timeout".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    /// Whether an error may be retried under this configuration.
    ///
    /// An error is retryable when its kind says so, when it carries a
    /// `statusCode` in the retryable set, or when its message matches one of
    /// the network/timeout patterns.
    pub fn is_retryable(&self, error: &AuditError) -> bool {
        if error.kind == error_common::ErrorKind::CircuitOpen {
            return false;
        }
        if error.is_retryable() {
            return true;
        }
        if let Some(code) = error
            .metadata
            .get("statusCode")
            .and_then(|c| c.parse::<u16>().ok())
        {
            if self.retryable_status_codes.contains(&code) {
                return true;
            }
        }
        self.retryable_errors
            .iter()
            .any(|pattern| error.message.contains(pattern))
    }

    /// Full-jitter backoff delay for a 1-indexed attempt:
    /// `Uniform(0, min(initial * multiplier^(n-1), max))`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent as i32);
        let capped = base.min(self.max_delay_ms as f64).max(0.0) as u64;
        let jittered = if capped == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped)
        };
        Duration::from_millis(jittered)
    }
}

/// Wrap the final cause once every attempt is consumed.
pub fn retry_exhausted(attempts: u32, cause: AuditError) -> AuditError {
    AuditError::new(
        error_common::ErrorKind::RetryExhausted,
        format!("retries exhausted after {attempts} attempts: {}", cause.message),
    )
    .with_metadata("attempts", attempts.to_string())
    .with_metadata("causeKind", cause.kind.to_string())
    .with_source(cause)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kind_is_retryable() {
        let config = RetryConfig::default();
        assert!(config.is_retryable(&AuditError::transient("ECONNRESET")));
        assert!(!config.is_retryable(&AuditError::invalid_event("bad payload")));
    }

    #[test]
    fn test_status_code_matching() {
        let config = RetryConfig::default();
        let retryable = AuditError::internal("upstream failed").with_metadata("statusCode", "503");
        let terminal = AuditError::internal("upstream failed").with_metadata("statusCode", "400");
        assert!(config.is_retryable(&retryable));
        assert!(!config.is_retryable(&terminal));
    }

    #[test]
    fn test_message_pattern_matching() {
        let config = RetryConfig::default();
        assert!(config.is_retryable(&AuditError::internal("read failed: ECONNRESET")));
        assert!(!config.is_retryable(&AuditError::internal("parse error at byte 3")));
    }

    #[test]
    fn test_circuit_open_never_retryable() {
        let config = RetryConfig::default();
        let err = AuditError::new(error_common::ErrorKind::CircuitOpen, "breaker open");
        assert!(!config.is_retryable(&err));
    }

    #[test]
    fn test_backoff_within_bounds() {
        let config = RetryConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        for attempt in 1..=6 {
            let ceiling = (100.0 * 2f64.powi(attempt as i32 - 1)).min(1_000.0) as u64;
            for _ in 0..20 {
                let delay = config.backoff_delay(attempt).as_millis() as u64;
                assert!(delay <= ceiling, "attempt {attempt}: {delay} > {ceiling}");
            }
        }
    }

    #[test]
    fn test_retry_exhausted_carries_cause() {
        let err = retry_exhausted(3, AuditError::transient("ECONNRESET"));
        assert_eq!(err.kind, error_common::ErrorKind::RetryExhausted);
        assert_eq!(err.metadata.get("attempts").map(String::as_str), Some("3"));
        assert!(err.message.contains("ECONNRESET"));
    }
}
