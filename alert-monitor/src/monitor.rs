use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use integrity_engine::AuditEvent;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AlertResult;
use crate::store::AlertStore;
use crate::types::{Alert, AlertSeverity, AlertType};

/// Threshold configuration for the monitor, sourced from the config core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Login failures per principal inside the window that raise an alert.
    pub failed_login_threshold: u32,
    pub failed_login_window_ms: u64,
    /// Dead-letter depth at which an alert is raised.
    pub dead_letter_alert_threshold: u64,
    /// Window during which identical alerts are deduplicated.
    pub dedup_window_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failed_login_threshold: 5,
            failed_login_window_ms: 60_000,
            dead_letter_alert_threshold: 100,
            dedup_window_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    at: DateTime<Utc>,
    principal_id: String,
    organization_id: String,
}

/// Applies threshold rules over a sliding window of processed events.
pub struct EventMonitor {
    store: AlertStore,
    config: MonitorConfig,
    failed_logins: Mutex<VecDeque<WindowEntry>>,
}

impl EventMonitor {
    pub fn new(store: AlertStore, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            failed_logins: Mutex::new(VecDeque::new()),
        }
    }

    fn dedup_window(&self) -> Duration {
        Duration::milliseconds(self.config.dedup_window_ms as i64)
    }

    /// Feed one processed event through the rules. Returns any alert raised.
    pub async fn observe(&self, event: &AuditEvent) -> AlertResult<Option<Alert>> {
        if event.action != "auth.login.failure" {
            return Ok(None);
        }
        let Some(principal_id) = event.principal_id.clone() else {
            return Ok(None);
        };
        let organization_id = event
            .organization_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        let now = Utc::now();
        let window = Duration::milliseconds(self.config.failed_login_window_ms as i64);
        let count = {
            let mut entries = self.failed_logins.lock().expect("monitor window poisoned");
            while entries
                .front()
                .is_some_and(|entry| now - entry.at > window)
            {
                entries.pop_front();
            }
            entries.push_back(WindowEntry {
                at: now,
                principal_id: principal_id.clone(),
                organization_id: organization_id.clone(),
            });
            entries
                .iter()
                .filter(|entry| {
                    entry.principal_id == principal_id
                        && entry.organization_id == organization_id
                })
                .count() as u32
        };

        if count < self.config.failed_login_threshold {
            debug!(principal = %principal_id, count, "login failure below threshold");
            return Ok(None);
        }

        let alert = Alert::new(
            organization_id,
            AlertType::Security,
            AlertSeverity::High,
            "event-monitor",
            "Repeated authentication failures",
            format!(
                "{count} failed login attempts for principal {principal_id} within {}s",
                self.config.failed_login_window_ms / 1_000
            ),
        )
        .with_correlation_key(format!("failed-logins:{principal_id}"));

        self.store.create_alert(alert, self.dedup_window()).await
    }

    /// Rule over queue health: alert when the dead-letter stream grows past
    /// the configured threshold.
    pub async fn observe_dead_letter_depth(
        &self,
        organization_id: &str,
        depth: u64,
    ) -> AlertResult<Option<Alert>> {
        if depth < self.config.dead_letter_alert_threshold {
            return Ok(None);
        }

        let alert = Alert::new(
            organization_id,
            AlertType::System,
            AlertSeverity::High,
            "event-monitor",
            "Dead-letter stream above threshold",
            format!(
                "dead-letter depth {depth} exceeds threshold {}",
                self.config.dead_letter_alert_threshold
            ),
        )
        .with_correlation_key("dead-letter-depth".to_string());

        self.store.create_alert(alert, self.dedup_window()).await
    }

    /// An integrity mismatch always raises a COMPLIANCE/HIGH alert.
    pub async fn observe_integrity_mismatch(
        &self,
        organization_id: &str,
        audit_log_id: i64,
    ) -> AlertResult<Option<Alert>> {
        let alert = Alert::new(
            organization_id,
            AlertType::Compliance,
            AlertSeverity::High,
            "integrity-verifier",
            "Audit event hash mismatch",
            format!("stored hash of audit event {audit_log_id} does not match its content"),
        )
        .with_correlation_key(format!("integrity-mismatch:{audit_log_id}"));

        self.store.create_alert(alert, self.dedup_window()).await
    }
}

#[cfg(test)]
mod tests {
    use database_layer::DatabasePool;
    use integrity_engine::EventStatus;

    use super::*;

    async fn monitor(threshold: u32) -> EventMonitor {
        let store = AlertStore::new(DatabasePool::in_memory().await.unwrap());
        EventMonitor::new(
            store,
            MonitorConfig {
                failed_login_threshold: threshold,
                failed_login_window_ms: 60_000,
                dead_letter_alert_threshold: 10,
                dedup_window_ms: 300_000,
            },
        )
    }

    fn failure(principal: &str) -> AuditEvent {
        AuditEvent::new("auth.login.failure", EventStatus::Failure)
            .with_principal(principal)
            .with_organization("org-1")
    }

    #[tokio::test]
    async fn test_threshold_raises_security_alert() {
        let monitor = monitor(5).await;

        for _ in 0..4 {
            assert!(monitor.observe(&failure("u1")).await.unwrap().is_none());
        }
        let alert = monitor
            .observe(&failure("u1"))
            .await
            .unwrap()
            .expect("fifth failure should alert");

        assert_eq!(alert.alert_type, AlertType::Security);
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.organization_id, "org-1");
    }

    #[tokio::test]
    async fn test_principals_counted_separately() {
        let monitor = monitor(3).await;

        monitor.observe(&failure("u1")).await.unwrap();
        monitor.observe(&failure("u2")).await.unwrap();
        monitor.observe(&failure("u1")).await.unwrap();
        assert!(monitor.observe(&failure("u2")).await.unwrap().is_none());
        assert!(monitor.observe(&failure("u1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_successful_logins_ignored() {
        let monitor = monitor(1).await;
        let event = AuditEvent::new("auth.login.success", EventStatus::Success)
            .with_principal("u1")
            .with_organization("org-1");
        assert!(monitor.observe(&event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeat_alert_deduplicated() {
        let monitor = monitor(2).await;

        monitor.observe(&failure("u1")).await.unwrap();
        let first = monitor.observe(&failure("u1")).await.unwrap();
        assert!(first.is_some());

        // Threshold still exceeded, but the unresolved alert dedups.
        let second = monitor.observe(&failure("u1")).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_depth_rule() {
        let monitor = monitor(5).await;
        assert!(monitor
            .observe_dead_letter_depth("org-1", 5)
            .await
            .unwrap()
            .is_none());
        assert!(monitor
            .observe_dead_letter_depth("org-1", 10)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_integrity_mismatch_rule() {
        let monitor = monitor(5).await;
        let alert = monitor
            .observe_integrity_mismatch("org-1", 42)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.alert_type, AlertType::Compliance);
        assert_eq!(alert.severity, AlertSeverity::High);
    }
}
