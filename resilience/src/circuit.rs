use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use error_common::{AuditError, ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker configuration, shared by all keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub monitoring_window_ms: u64,
    pub minimum_request_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
            minimum_request_threshold: 5,
        }
    }
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of one key's breaker, for monitoring surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    opened_until: Option<Instant>,
    next_retry_at: Option<DateTime<Utc>>,
    half_open_trial_inflight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure: None,
            last_failure_at: None,
            opened_until: None,
            next_retry_at: None,
            half_open_trial_inflight: false,
        }
    }

    fn reset_counters(&mut self) {
        self.failure_count = 0;
        self.success_count = 0;
        self.total_requests = 0;
        self.last_failure = None;
        self.last_failure_at = None;
    }
}

/// Per-key circuit breakers, keyed by `endpoint:method`.
///
/// The map is shared across tasks; updates are serialized per key by the
/// shard lock of the entry.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, BreakerEntry>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Gate a call. `Ok` admits the call; `Err` is a `CircuitOpen` rejection
    /// carrying `nextRetryTime`.
    pub fn before_call(&self, key: &str) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                if entry.opened_until.is_some_and(|until| now >= until) {
                    info!(key, "circuit breaker entering half-open");
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_trial_inflight = true;
                    Ok(())
                } else {
                    Err(circuit_open_error(key, entry.next_retry_at))
                }
            }
            CircuitState::HalfOpen => {
                if entry.half_open_trial_inflight {
                    Err(circuit_open_error(key, entry.next_retry_at))
                } else {
                    entry.half_open_trial_inflight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::HalfOpen => {
                info!(key, "circuit breaker closing after successful trial");
                entry.state = CircuitState::Closed;
                entry.reset_counters();
                entry.opened_until = None;
                entry.next_retry_at = None;
                entry.half_open_trial_inflight = false;
            }
            _ => {
                self.expire_window(&mut entry);
                entry.success_count += 1;
                entry.total_requests += 1;
            }
        }
    }

    pub fn record_failure(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);

        self.expire_window(&mut entry);
        entry.failure_count += 1;
        entry.total_requests += 1;
        entry.last_failure = Some(Instant::now());
        entry.last_failure_at = Some(Utc::now());

        match entry.state {
            CircuitState::Closed => {
                if entry.total_requests >= self.config.minimum_request_threshold as u64
                    && entry.failure_count >= self.config.failure_threshold
                {
                    self.trip(key, &mut entry);
                }
            }
            CircuitState::HalfOpen => {
                self.trip(key, &mut entry);
                entry.half_open_trial_inflight = false;
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, key: &str, entry: &mut BreakerEntry) {
        warn!(key, failures = entry.failure_count, "circuit breaker opening");
        entry.state = CircuitState::Open;
        let recovery = Duration::from_millis(self.config.recovery_timeout_ms);
        entry.opened_until = Some(Instant::now() + recovery);
        entry.next_retry_at =
            Some(Utc::now() + chrono::Duration::milliseconds(self.config.recovery_timeout_ms as i64));
    }

    /// Counters reset once the last failure leaves the monitoring window.
    fn expire_window(&self, entry: &mut BreakerEntry) {
        if let Some(last) = entry.last_failure {
            if last.elapsed() > Duration::from_millis(self.config.monitoring_window_ms) {
                entry.reset_counters();
            }
        }
    }

    pub fn stats(&self, key: &str) -> Option<CircuitBreakerStats> {
        self.breakers.get(key).map(|entry| CircuitBreakerStats {
            state: entry.state,
            failure_count: entry.failure_count,
            success_count: entry.success_count,
            total_requests: entry.total_requests,
            last_failure_time: entry.last_failure_at,
            next_retry_time: entry.next_retry_at,
        })
    }

    pub fn all_stats(&self) -> Vec<(String, CircuitBreakerStats)> {
        self.breakers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    CircuitBreakerStats {
                        state: entry.state,
                        failure_count: entry.failure_count,
                        success_count: entry.success_count,
                        total_requests: entry.total_requests,
                        last_failure_time: entry.last_failure_at,
                        next_retry_time: entry.next_retry_at,
                    },
                )
            })
            .collect()
    }
}

fn circuit_open_error(key: &str, next_retry_at: Option<DateTime<Utc>>) -> AuditError {
    let mut err = AuditError::new(
        ErrorKind::CircuitOpen,
        format!("circuit breaker open for {key}"),
    );
    if let Some(at) = next_retry_at {
        err = err.with_metadata("nextRetryTime", at.to_rfc3339());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(recovery_ms: u64) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: recovery_ms,
            monitoring_window_ms: 60_000,
            minimum_request_threshold: 5,
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let registry = registry(30_000);
        let key = "https://collector.example:POST";

        for _ in 0..5 {
            registry.before_call(key).unwrap();
            registry.record_failure(key);
        }

        let err = registry.before_call(key).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert!(err.metadata.contains_key("nextRetryTime"));

        let stats = registry.stats(key).unwrap();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.failure_count, 5);
    }

    #[test]
    fn test_below_minimum_requests_stays_closed() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 2,
            minimum_request_threshold: 10,
            ..Default::default()
        });
        let key = "svc:GET";

        for _ in 0..5 {
            registry.before_call(key).unwrap();
            registry.record_failure(key);
        }
        assert!(registry.before_call(key).is_ok());
    }

    #[test]
    fn test_half_open_single_trial_then_close() {
        let registry = registry(10);
        let key = "svc:POST";

        for _ in 0..5 {
            registry.before_call(key).unwrap();
            registry.record_failure(key);
        }
        assert!(registry.before_call(key).is_err());

        std::thread::sleep(Duration::from_millis(20));

        // First caller is admitted as the half-open trial, a second is not.
        registry.before_call(key).unwrap();
        assert!(registry.before_call(key).is_err());

        registry.record_success(key);
        let stats = registry.stats(key).unwrap();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_requests, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let registry = registry(10);
        let key = "svc:PUT";

        for _ in 0..5 {
            registry.before_call(key).unwrap();
            registry.record_failure(key);
        }
        std::thread::sleep(Duration::from_millis(20));

        registry.before_call(key).unwrap();
        registry.record_failure(key);

        let stats = registry.stats(key).unwrap();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(registry.before_call(key).is_err());
    }

    #[test]
    fn test_disabled_breaker_admits_everything() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            enabled: false,
            ..Default::default()
        });
        for _ in 0..50 {
            registry.before_call("svc:GET").unwrap();
            registry.record_failure("svc:GET");
        }
        assert!(registry.before_call("svc:GET").is_ok());
    }

    #[test]
    fn test_keys_are_independent() {
        let registry = registry(30_000);
        for _ in 0..5 {
            registry.before_call("a:GET").unwrap();
            registry.record_failure("a:GET");
        }
        assert!(registry.before_call("a:GET").is_err());
        assert!(registry.before_call("b:GET").is_ok());
    }
}
