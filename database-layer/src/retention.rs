use integrity_engine::DataClassification;
use sqlx::Row;
use tracing::info;

use crate::connection::DatabasePool;
use crate::error::{DatabaseError, DatabaseResult};
use crate::models::{fmt_ts, parse_ts, RetentionPolicy};

/// Repository over `audit_retention_policy`.
#[derive(Clone)]
pub struct RetentionPolicyRepository {
    db: DatabasePool,
}

impl RetentionPolicyRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Insert or update a policy by name. The policy is validated first;
    /// invalid bounds are configuration errors.
    pub async fn upsert(&self, policy: &RetentionPolicy) -> DatabaseResult<i64> {
        policy.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO audit_retention_policy (
                policy_name, data_classification, retention_days,
                archive_after_days, delete_after_days, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (policy_name) DO UPDATE SET
                data_classification = excluded.data_classification,
                retention_days = excluded.retention_days,
                archive_after_days = excluded.archive_after_days,
                delete_after_days = excluded.delete_after_days,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&policy.policy_name)
        .bind(policy.data_classification.as_str())
        .bind(policy.retention_days)
        .bind(policy.archive_after_days)
        .bind(policy.delete_after_days)
        .bind(policy.is_active as i64)
        .bind(fmt_ts(policy.created_at))
        .bind(fmt_ts(policy.updated_at))
        .execute(self.db.pool())
        .await?;

        info!(policy = %policy.policy_name, "retention policy stored");
        Ok(result.last_insert_rowid())
    }

    /// Active policies in creation order, the order retention passes apply
    /// them in.
    pub async fn list_active(&self) -> DatabaseResult<Vec<RetentionPolicy>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_retention_policy WHERE is_active = 1 ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RetentionPolicy {
                    id: Some(row.try_get("id")?),
                    policy_name: row.try_get("policy_name")?,
                    data_classification: DataClassification::parse(
                        row.try_get::<String, _>("data_classification")?.as_str(),
                    )
                    .map_err(DatabaseError::EventError)?,
                    retention_days: row.try_get("retention_days")?,
                    archive_after_days: row.try_get("archive_after_days")?,
                    delete_after_days: row.try_get("delete_after_days")?,
                    is_active: row.try_get::<i64, _>("is_active")? != 0,
                    created_at: parse_ts(row.try_get::<String, _>("created_at")?.as_str())?,
                    updated_at: parse_ts(row.try_get::<String, _>("updated_at")?.as_str())?,
                })
            })
            .collect()
    }

    pub async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<RetentionPolicy>> {
        let policies = self.list_active().await?;
        Ok(policies.into_iter().find(|p| p.policy_name == name))
    }

    /// Deactivate a policy without deleting its history.
    pub async fn deactivate(&self, name: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE audit_retention_policy SET is_active = 0, updated_at = ? WHERE policy_name = ?",
        )
        .bind(fmt_ts(chrono::Utc::now()))
        .bind(name)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compliance presets: HIPAA PHI (6 years), SOX-style confidential
    /// (7 years), standard internal, short-lived public.
    pub async fn seed_presets(&self) -> DatabaseResult<usize> {
        let presets = [
            RetentionPolicy::new("hipaa-phi", DataClassification::Phi, 2190)
                .with_archive_after_days(365)
                .with_delete_after_days(2190),
            RetentionPolicy::new("confidential-7yr", DataClassification::Confidential, 2555)
                .with_archive_after_days(730)
                .with_delete_after_days(2555),
            RetentionPolicy::new("standard", DataClassification::Internal, 730)
                .with_archive_after_days(365)
                .with_delete_after_days(730),
            RetentionPolicy::new("public-short", DataClassification::Public, 90)
                .with_archive_after_days(30)
                .with_delete_after_days(90),
        ];

        for preset in &presets {
            self.upsert(preset).await?;
        }
        Ok(presets.len())
    }
}
