use chrono::{DateTime, Utc};
use integrity_engine::{
    verify_event, IntegrityVerification, VerificationStatus, VerificationSummary,
};
use sqlx::Row;
use tracing::{info, warn};

use crate::audit_log::AuditLogRepository;
use crate::connection::DatabasePool;
use crate::error::DatabaseResult;
use crate::models::{fmt_ts, parse_ts, EventFilter};

/// Which events an integrity sweep covers.
#[derive(Debug, Clone)]
pub enum SweepSelection {
    ById(i64),
    TimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    Organization(String),
}

/// Result of a sweep: the summary plus the ids that failed verification, so
/// the caller can raise alerts.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub summary: VerificationSummary,
    pub mismatched_ids: Vec<i64>,
}

/// Re-canonicalizes and re-hashes stored events, recording each outcome in
/// `audit_integrity_log`. A mismatch never stops the batch.
#[derive(Clone)]
pub struct IntegrityVerifier {
    db: DatabasePool,
    events: AuditLogRepository,
}

impl IntegrityVerifier {
    pub fn new(db: DatabasePool) -> Self {
        let events = AuditLogRepository::new(db.clone());
        Self { db, events }
    }

    pub async fn sweep(
        &self,
        selection: SweepSelection,
        verified_by: &str,
    ) -> DatabaseResult<SweepResult> {
        let events = match &selection {
            SweepSelection::ById(id) => vec![self.events.fetch_by_id(*id).await?],
            SweepSelection::TimeRange { from, to } => {
                self.events
                    .query(&EventFilter::default().in_range(*from, *to))
                    .await?
            }
            SweepSelection::Organization(org) => {
                self.events
                    .query(&EventFilter {
                        organization_id: Some(org.clone()),
                        ..Default::default()
                    })
                    .await?
            }
        };

        let mut result = SweepResult::default();
        for event in &events {
            let status = verify_event(event)?;
            result.summary.record(&status);

            let id = event.id.unwrap_or_default();
            if let VerificationStatus::Mismatch { expected, observed } = &status {
                warn!(
                    audit_log_id = id,
                    expected, observed, "integrity mismatch detected"
                );
                result.mismatched_ids.push(id);
            }
            self.record_outcome(id, &status, verified_by).await?;
        }

        info!(
            checked = result.summary.checked,
            ok = result.summary.ok,
            mismatched = result.summary.mismatched,
            missing_hash = result.summary.missing_hash,
            "integrity sweep complete"
        );
        Ok(result)
    }

    async fn record_outcome(
        &self,
        audit_log_id: i64,
        status: &VerificationStatus,
        verified_by: &str,
    ) -> DatabaseResult<IntegrityVerification> {
        let (expected_hash, observed_hash) = match status {
            VerificationStatus::Mismatch { expected, observed } => {
                (Some(expected.clone()), Some(observed.clone()))
            }
            _ => (None, None),
        };

        let record = IntegrityVerification {
            audit_log_id,
            verified_at: Utc::now(),
            status: status.as_str().to_string(),
            expected_hash,
            observed_hash,
            verified_by: verified_by.to_string(),
            details: None,
        };

        sqlx::query(
            r#"
            INSERT INTO audit_integrity_log (
                audit_log_id, verified_at, status, expected_hash,
                observed_hash, verified_by, details
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.audit_log_id)
        .bind(fmt_ts(record.verified_at))
        .bind(&record.status)
        .bind(&record.expected_hash)
        .bind(&record.observed_hash)
        .bind(&record.verified_by)
        .bind(&record.details)
        .execute(self.db.pool())
        .await?;
        Ok(record)
    }

    /// Count of recorded verification outcomes, for reporting.
    pub async fn verification_count(&self) -> DatabaseResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM audit_integrity_log")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Most recent verification outcomes for an event.
    pub async fn history_for_event(
        &self,
        audit_log_id: i64,
        limit: i64,
    ) -> DatabaseResult<Vec<IntegrityVerification>> {
        let rows = sqlx::query(
            r#"
            SELECT audit_log_id, verified_at, status, expected_hash,
                   observed_hash, verified_by, details
            FROM audit_integrity_log
            WHERE audit_log_id = ?
            ORDER BY verified_at DESC
            LIMIT ?
            "#,
        )
        .bind(audit_log_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IntegrityVerification {
                    audit_log_id: row.try_get("audit_log_id")?,
                    verified_at: parse_ts(row.try_get::<String, _>("verified_at")?.as_str())?,
                    status: row.try_get("status")?,
                    expected_hash: row.try_get("expected_hash")?,
                    observed_hash: row.try_get("observed_hash")?,
                    verified_by: row.try_get("verified_by")?,
                    details: row.try_get("details")?,
                })
            })
            .collect()
    }
}
