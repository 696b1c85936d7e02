use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use database_layer::{
    fmt_ts, AuditLogRepository, DatabasePool, EventFilter, RetentionPolicyRepository,
};
use integrity_engine::{seal_event, AuditEvent, EventStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::GdprResult;
use crate::export::{render_export, ExportRequest, ExportResult};
use crate::pseudonym::{PseudonymRegistry, PseudonymStrategy};

/// Actions whose audit records survive erasure (pseudonymized rather than
/// deleted) when trail preservation is requested.
pub const DEFAULT_COMPLIANCE_ACTIONS: &[&str] = &[
    "auth.login.success",
    "auth.login.failure",
    "data.access.unauthorized",
    "gdpr.data.export",
    "gdpr.data.pseudonymize",
    "gdpr.data.delete",
];

/// Result of pseudonymizing a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PseudonymizeResult {
    pub pseudonym_id: String,
    pub records_affected: u64,
}

/// Result of an erasure request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureResult {
    pub records_deleted: u64,
    pub compliance_records_preserved: u64,
}

/// Per-policy outcome of a retention pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicyReport {
    pub policy_name: String,
    pub records_archived: u64,
    pub records_deleted: u64,
    pub by_classification: BTreeMap<String, u64>,
    pub by_action: BTreeMap<String, u64>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// GDPR engine over the persisted audit store.
#[derive(Clone)]
pub struct GdprEngine {
    events: AuditLogRepository,
    policies: RetentionPolicyRepository,
    registry: PseudonymRegistry,
    /// Advisory locks serializing operations per data subject.
    subject_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl GdprEngine {
    pub fn new(db: DatabasePool, registry: PseudonymRegistry) -> Self {
        Self {
            events: AuditLogRepository::new(db.clone()),
            policies: RetentionPolicyRepository::new(db),
            registry,
            subject_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &PseudonymRegistry {
        &self.registry
    }

    fn subject_lock(&self, principal_id: &str) -> Arc<Mutex<()>> {
        self.subject_locks
            .entry(principal_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // =========================================================================
    // Export (access / portability)
    // =========================================================================

    pub async fn export_user_data(&self, request: ExportRequest) -> GdprResult<ExportResult> {
        let mut filter = EventFilter::for_principal(&request.principal_id);
        if let Some((from, to)) = request.date_range {
            filter = filter.in_range(from, to);
        }
        let events = self.events.query(&filter).await?;

        let request_id = Uuid::new_v4();
        let data = render_export(&request, request_id, &events)?;

        let mut categories: Vec<String> = events
            .iter()
            .map(|e| e.data_classification.as_str().to_string())
            .collect();
        categories.sort();
        categories.dedup();

        let mut retention_policies: Vec<String> =
            events.iter().map(|e| e.retention_policy.clone()).collect();
        retention_policies.sort();
        retention_policies.dedup();

        let result = ExportResult {
            request_id,
            record_count: events.len() as u64,
            data_size: data.len() as u64,
            exported_by: request.requested_by.clone(),
            categories,
            retention_policies,
            date_range: request.date_range,
            data,
        };

        self.audit_operation(
            "gdpr.data.export",
            Some(&request.principal_id),
            json!({
                "requestId": request_id.to_string(),
                "requestType": request.request_type,
                "format": format!("{:?}", request.format).to_lowercase(),
                "recordCount": result.record_count,
                "dataSize": result.data_size,
                "requestedBy": request.requested_by,
            }),
        )
        .await?;

        info!(
            principal = %request.principal_id,
            records = result.record_count,
            "data subject export complete"
        );
        Ok(result)
    }

    // =========================================================================
    // Pseudonymization
    // =========================================================================

    pub async fn pseudonymize_user_data(
        &self,
        principal_id: &str,
        strategy: PseudonymStrategy,
        requested_by: &str,
    ) -> GdprResult<PseudonymizeResult> {
        let lock = self.subject_lock(principal_id);
        let _guard = lock.lock().await;
        self.pseudonymize_locked(principal_id, strategy, requested_by, None)
            .await
    }

    /// Inner pseudonymization; the subject lock must already be held.
    async fn pseudonymize_locked(
        &self,
        principal_id: &str,
        strategy: PseudonymStrategy,
        requested_by: &str,
        only_actions: Option<&[String]>,
    ) -> GdprResult<PseudonymizeResult> {
        let pseudonym_id = self.registry.create_pseudonym(principal_id, strategy).await?;
        let records_affected = self
            .events
            .pseudonymize_events(principal_id, &pseudonym_id, only_actions, Utc::now())
            .await?;

        self.audit_operation(
            "gdpr.data.pseudonymize",
            Some(&pseudonym_id),
            json!({
                "strategy": strategy.as_str(),
                "recordsAffected": records_affected,
                "requestedBy": requested_by,
            }),
        )
        .await?;

        Ok(PseudonymizeResult {
            pseudonym_id,
            records_affected,
        })
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Apply every active retention policy in creation order: archive first,
    /// then delete already-archived events past the deletion horizon.
    pub async fn apply_retention_policies(
        &self,
        requested_by: &str,
    ) -> GdprResult<Vec<RetentionPolicyReport>> {
        let now = Utc::now();
        let mut reports = Vec::new();

        for policy in self.policies.list_active().await? {
            let mut report = RetentionPolicyReport {
                policy_name: policy.policy_name.clone(),
                records_archived: 0,
                records_deleted: 0,
                by_classification: BTreeMap::new(),
                by_action: BTreeMap::new(),
                date_range: None,
            };
            let class_key = policy.data_classification.as_str().to_string();

            if let Some(archive_days) = policy.archive_after_days {
                let cutoff = now - Duration::days(archive_days);
                let archived = self
                    .events
                    .archive_events(policy.data_classification, cutoff, now)
                    .await?;
                report.records_archived = archived.len() as u64;
                for row in &archived {
                    *report.by_action.entry(row.action.clone()).or_default() += 1;
                    extend_range(&mut report.date_range, row.timestamp);
                }
                *report.by_classification.entry(class_key.clone()).or_default() +=
                    archived.len() as u64;
            }

            if let Some(delete_days) = policy.delete_after_days {
                let cutoff = now - Duration::days(delete_days);
                let deleted = self
                    .events
                    .delete_archived_events(policy.data_classification, cutoff)
                    .await?;
                report.records_deleted = deleted.len() as u64;
                for row in &deleted {
                    *report.by_action.entry(row.action.clone()).or_default() += 1;
                    extend_range(&mut report.date_range, row.timestamp);
                }
            }

            info!(
                policy = %report.policy_name,
                archived = report.records_archived,
                deleted = report.records_deleted,
                "retention policy applied"
            );
            reports.push(report);
        }

        let totals = json!({
            "policiesApplied": reports.len(),
            "recordsArchived": reports.iter().map(|r| r.records_archived).sum::<u64>(),
            "recordsDeleted": reports.iter().map(|r| r.records_deleted).sum::<u64>(),
            "requestedBy": requested_by,
            "appliedAt": fmt_ts(now),
        });
        self.audit_operation("gdpr.retention.apply", None, totals)
            .await?;

        Ok(reports)
    }

    // =========================================================================
    // Erasure with audit-trail preservation
    // =========================================================================

    /// Right to be forgotten. With `preserve_compliance_audits`, the
    /// subject's compliance-critical records are pseudonymized and every
    /// other record is deleted; otherwise everything goes.
    pub async fn delete_user_data_with_audit_trail(
        &self,
        principal_id: &str,
        requested_by: &str,
        preserve_compliance_audits: bool,
    ) -> GdprResult<ErasureResult> {
        let lock = self.subject_lock(principal_id);
        let _guard = lock.lock().await;

        let compliance_actions: Vec<String> = DEFAULT_COMPLIANCE_ACTIONS
            .iter()
            .map(|s| s.to_string())
            .collect();

        let preserved = if preserve_compliance_audits {
            self.pseudonymize_locked(
                principal_id,
                PseudonymStrategy::Hash,
                requested_by,
                Some(&compliance_actions),
            )
            .await?
            .records_affected
        } else {
            0
        };

        // Compliance records now live under the pseudonym; whatever is still
        // keyed by the original principal is deletable.
        let deleted = self
            .events
            .delete_events_for_principal(principal_id, &[])
            .await?;

        self.audit_operation(
            "gdpr.data.delete",
            None,
            json!({
                "recordsDeleted": deleted,
                "complianceRecordsPreserved": preserved,
                "preserveComplianceAudits": preserve_compliance_audits,
                "requestedBy": requested_by,
            }),
        )
        .await?;

        info!(
            deleted,
            preserved, "erasure complete for data subject"
        );
        Ok(ErasureResult {
            records_deleted: deleted,
            compliance_records_preserved: preserved,
        })
    }

    // =========================================================================
    // Engine audit trail
    // =========================================================================

    async fn audit_operation(
        &self,
        action: &str,
        principal_id: Option<&str>,
        details: serde_json::Value,
    ) -> GdprResult<()> {
        let mut event = AuditEvent::new(action, EventStatus::Success)
            .with_classification(integrity_engine::DataClassification::Confidential)
            .with_details(details);
        if let Some(principal) = principal_id {
            event = event.with_principal(principal);
        }
        seal_event(&mut event)?;

        let key = event.hash.clone().expect("event just sealed");
        self.events.insert_event(&event, &key).await?;
        Ok(())
    }
}

fn extend_range(
    range: &mut Option<(DateTime<Utc>, DateTime<Utc>)>,
    ts: DateTime<Utc>,
) {
    *range = Some(match range {
        None => (ts, ts),
        Some((min, max)) => (ts.min(*min), ts.max(*max)),
    });
}

#[cfg(test)]
mod tests {
    use database_layer::RetentionPolicy;
    use integrity_engine::DataClassification;

    use super::*;
    use crate::export::ExportFormat;

    async fn engine() -> (GdprEngine, AuditLogRepository) {
        let db = DatabasePool::in_memory().await.unwrap();
        let registry = PseudonymRegistry::new(db.clone(), "test-salt").unwrap();
        let repo = AuditLogRepository::new(db.clone());
        (GdprEngine::new(db, registry), repo)
    }

    async fn insert_event(repo: &AuditLogRepository, event: AuditEvent) -> i64 {
        let mut event = event;
        seal_event(&mut event).unwrap();
        repo.insert_event(&event, event.hash.as_ref().unwrap())
            .await
            .unwrap()
            .id()
    }

    fn subject_event(action: &str, principal: &str) -> AuditEvent {
        AuditEvent::new(action, EventStatus::Success).with_principal(principal)
    }

    #[tokio::test]
    async fn test_export_envelope_and_audit_trail() {
        let (engine, repo) = engine().await;
        insert_event(&repo, subject_event("data.read", "u9")).await;
        insert_event(&repo, subject_event("data.write", "u9")).await;

        let result = engine
            .export_user_data(ExportRequest::access("u9", "dpo").with_format(ExportFormat::Csv))
            .await
            .unwrap();

        assert_eq!(result.record_count, 2);
        assert_eq!(result.data_size, result.data.len() as u64);
        assert_eq!(result.categories, vec!["INTERNAL".to_string()]);

        // The export itself left an audit event.
        let audit = repo
            .query(&EventFilter {
                action: Some("gdpr.data.export".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].principal_id.as_deref(), Some("u9"));
    }

    #[tokio::test]
    async fn test_pseudonymize_rewrites_and_audits() {
        let (engine, repo) = engine().await;
        insert_event(&repo, subject_event("data.read", "subject-1")).await;
        insert_event(&repo, subject_event("data.write", "subject-1")).await;

        let result = engine
            .pseudonymize_user_data("subject-1", PseudonymStrategy::Hash, "dpo")
            .await
            .unwrap();

        assert_eq!(result.records_affected, 2);
        assert!(result.pseudonym_id.starts_with("pseudo-"));

        let rewritten = repo
            .query(&EventFilter::for_principal(&result.pseudonym_id))
            .await
            .unwrap();
        // Two rewritten events plus the pseudonymize audit event itself.
        assert_eq!(
            rewritten
                .iter()
                .filter(|e| e.action != "gdpr.data.pseudonymize")
                .count(),
            2
        );
        assert!(rewritten
            .iter()
            .filter(|e| e.action != "gdpr.data.pseudonymize")
            .all(|e| e.details.as_ref().unwrap()["pseudonymized"] == true));

        // Deterministic: lookup is stable.
        assert_eq!(
            engine.registry().lookup("subject-1").await.unwrap().unwrap(),
            result.pseudonym_id
        );
    }

    #[tokio::test]
    async fn test_erasure_with_preservation() {
        let (engine, repo) = engine().await;
        // 5 events, 2 compliance-critical.
        insert_event(&repo, subject_event("auth.login.failure", "u9")).await;
        insert_event(
            &repo,
            subject_event("auth.login.failure", "u9").with_outcome("second attempt"),
        )
        .await;
        insert_event(&repo, subject_event("data.read", "u9")).await;
        insert_event(&repo, subject_event("data.write", "u9")).await;
        insert_event(&repo, subject_event("profile.update", "u9")).await;

        let result = engine
            .delete_user_data_with_audit_trail("u9", "admin", true)
            .await
            .unwrap();

        assert_eq!(result.records_deleted, 3);
        assert_eq!(result.compliance_records_preserved, 2);

        // Nothing remains under the original principal.
        assert!(repo
            .query(&EventFilter::for_principal("u9"))
            .await
            .unwrap()
            .is_empty());

        // The preserved events carry the deterministic pseudonym.
        let pseudonym = engine.registry().lookup("u9").await.unwrap().unwrap();
        let preserved = repo
            .query(&EventFilter::for_principal(&pseudonym))
            .await
            .unwrap();
        let kept: Vec<_> = preserved
            .iter()
            .filter(|e| e.action == "auth.login.failure")
            .collect();
        assert_eq!(kept.len(), 2);
        assert!(kept
            .iter()
            .all(|e| e.details.as_ref().unwrap()["pseudonymized"] == true));
    }

    #[tokio::test]
    async fn test_erasure_without_preservation() {
        let (engine, repo) = engine().await;
        insert_event(&repo, subject_event("auth.login.failure", "u10")).await;
        insert_event(&repo, subject_event("data.read", "u10")).await;

        let result = engine
            .delete_user_data_with_audit_trail("u10", "admin", false)
            .await
            .unwrap();

        assert_eq!(result.records_deleted, 2);
        assert_eq!(result.compliance_records_preserved, 0);
        assert!(repo
            .query(&EventFilter::for_principal("u10"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retention_apply_scenario() {
        let (engine, repo) = engine().await;
        engine
            .policies
            .upsert(
                &RetentionPolicy::new("phi-rotation", DataClassification::Phi, 365)
                    .with_archive_after_days(30)
                    .with_delete_after_days(90),
            )
            .await
            .unwrap();

        for age_days in [10i64, 45, 120] {
            insert_event(
                &repo,
                AuditEvent::new("phi.access", EventStatus::Success)
                    .with_classification(DataClassification::Phi)
                    .with_timestamp(Utc::now() - Duration::days(age_days)),
            )
            .await;
        }

        // Ages 45 and 120 get archived; the archive step runs first, so the
        // age-120 event is already archived when the delete step evaluates it.
        let reports = engine.apply_retention_policies("scheduler").await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].records_archived, 2);
        assert_eq!(reports[0].records_deleted, 1);

        // Age 10 event is untouched.
        let unarchived = repo
            .query(&EventFilter {
                data_classification: Some(DataClassification::Phi),
                archived: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unarchived.len(), 1);

        // The age-120 event is gone, age-45 remains archived.
        let archived = repo
            .query(&EventFilter {
                data_classification: Some(DataClassification::Phi),
                archived: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);

        // Pass is audited.
        let audit = repo
            .query(&EventFilter {
                action: Some("gdpr.retention.apply".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn test_subject_operations_serialized() {
        let (engine, repo) = engine().await;
        insert_event(&repo, subject_event("data.read", "locked-subject")).await;

        // Run pseudonymize and erasure concurrently on the same subject; the
        // advisory lock means both complete without interleaving.
        let e1 = engine.clone();
        let e2 = engine.clone();
        let (a, b) = tokio::join!(
            e1.pseudonymize_user_data("locked-subject", PseudonymStrategy::Hash, "dpo"),
            e2.delete_user_data_with_audit_trail("locked-subject", "admin", true),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
