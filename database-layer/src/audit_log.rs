use chrono::{DateTime, Utc};
use integrity_engine::{seal_event, AuditEvent, DataClassification, EventStatus, SessionContext};
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::connection::DatabasePool;
use crate::error::{DatabaseError, DatabaseResult};
use crate::models::{fmt_ts, parse_ts, EventFilter};

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted(i64),
    /// The idempotency key already mapped to an identical payload.
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => *id,
        }
    }
}

/// Action and timestamp of a row touched by a retention pass.
#[derive(Debug, Clone)]
pub struct TouchedRow {
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// Repository over the `audit_log` table.
#[derive(Clone)]
pub struct AuditLogRepository {
    db: DatabasePool,
}

impl AuditLogRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Insert a sealed event in a single transaction.
    ///
    /// Consumers are idempotent with respect to the idempotency key: a replay
    /// with the same key and hash is acknowledged as a duplicate; the same
    /// key with a differing hash is a `Conflict` for human review.
    pub async fn insert_event(
        &self,
        event: &AuditEvent,
        idempotency_key: &str,
    ) -> DatabaseResult<InsertOutcome> {
        let hash = event
            .hash
            .as_deref()
            .ok_or_else(|| DatabaseError::QueryFailed("event must be sealed before insert".into()))?;

        let mut tx = self.db.pool().begin().await?;

        let existing = sqlx::query("SELECT id, hash FROM audit_log WHERE idempotency_key = ?")
            .bind(idempotency_key)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = existing {
            let existing_id: i64 = row.try_get("id")?;
            let existing_hash: Option<String> = row.try_get("hash")?;
            tx.rollback().await?;
            return if existing_hash.as_deref() == Some(hash) {
                debug!(id = existing_id, "duplicate delivery acknowledged");
                Ok(InsertOutcome::Duplicate(existing_id))
            } else {
                Err(DatabaseError::Conflict(format!(
                    "idempotency key {idempotency_key} maps to a different payload"
                )))
            };
        }

        let session = event.session_context.clone().unwrap_or_default();
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (
                timestamp, principal_id, organization_id, action, status,
                target_resource_type, target_resource_id, outcome_description,
                data_classification, retention_policy, correlation_id,
                session_id, ip_address, user_agent, details,
                hash, hash_algorithm, event_version,
                processing_latency_ms, idempotency_key, archived_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fmt_ts(event.timestamp))
        .bind(&event.principal_id)
        .bind(&event.organization_id)
        .bind(&event.action)
        .bind(event.status.as_str())
        .bind(&event.target_resource_type)
        .bind(&event.target_resource_id)
        .bind(&event.outcome_description)
        .bind(event.data_classification.as_str())
        .bind(&event.retention_policy)
        .bind(&event.correlation_id)
        .bind(&session.session_id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(event.details.as_ref().map(|d| d.to_string()))
        .bind(hash)
        .bind(&event.hash_algorithm)
        .bind(&event.event_version)
        .bind(event.processing_latency_ms)
        .bind(idempotency_key)
        .bind(event.archived_at.map(fmt_ts))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
    }

    pub async fn fetch_by_id(&self, id: i64) -> DatabaseResult<AuditEvent> {
        let row = sqlx::query("SELECT * FROM audit_log WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(DatabaseError::NotFound)?;
        row_to_event(&row)
    }

    /// Query events by filter, ordered by timestamp ascending.
    pub async fn query(&self, filter: &EventFilter) -> DatabaseResult<Vec<AuditEvent>> {
        let mut sql = String::from("SELECT * FROM audit_log WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(principal) = &filter.principal_id {
            sql.push_str(" AND principal_id = ?");
            binds.push(principal.clone());
        }
        if let Some(org) = &filter.organization_id {
            sql.push_str(" AND organization_id = ?");
            binds.push(org.clone());
        }
        if let Some(action) = &filter.action {
            sql.push_str(" AND action = ?");
            binds.push(action.clone());
        }
        if let Some(class) = filter.data_classification {
            sql.push_str(" AND data_classification = ?");
            binds.push(class.as_str().to_string());
        }
        if let Some(from) = filter.from {
            sql.push_str(" AND timestamp >= ?");
            binds.push(fmt_ts(from));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND timestamp <= ?");
            binds.push(fmt_ts(to));
        }
        match filter.archived {
            Some(true) => sql.push_str(" AND archived_at IS NOT NULL"),
            Some(false) => sql.push_str(" AND archived_at IS NULL"),
            None => {}
        }
        sql.push_str(" ORDER BY timestamp ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(self.db.pool()).await?;
        rows.iter().map(row_to_event).collect()
    }

    pub async fn count(&self, filter: &EventFilter) -> DatabaseResult<u64> {
        Ok(self.query(filter).await?.len() as u64)
    }

    /// Rewrite a subject's events to the given pseudonym.
    ///
    /// Each affected event gets `details.pseudonymized = true` and
    /// `details.pseudonymizedAt`, its `principal_id` replaced, and its hash
    /// re-sealed, all within one transaction. When `only_actions` is given,
    /// only events with those actions are rewritten.
    pub async fn pseudonymize_events(
        &self,
        principal_id: &str,
        pseudonym_id: &str,
        only_actions: Option<&[String]>,
        pseudonymized_at: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        let mut tx = self.db.pool().begin().await?;

        let rows = sqlx::query("SELECT * FROM audit_log WHERE principal_id = ?")
            .bind(principal_id)
            .fetch_all(&mut *tx)
            .await?;

        let mut affected = 0u64;
        for row in &rows {
            let mut event = row_to_event(row)?;
            if let Some(actions) = only_actions {
                if !actions.iter().any(|a| a == &event.action) {
                    continue;
                }
            }

            let mut details = event
                .details
                .take()
                .unwrap_or_else(|| json!({}));
            if let Some(map) = details.as_object_mut() {
                map.insert("pseudonymized".to_string(), json!(true));
                map.insert(
                    "pseudonymizedAt".to_string(),
                    json!(fmt_ts(pseudonymized_at)),
                );
            }
            event.details = Some(details);
            event.principal_id = Some(pseudonym_id.to_string());
            seal_event(&mut event)?;

            let id = event
                .id
                .ok_or_else(|| DatabaseError::QueryFailed("row without id".into()))?;
            sqlx::query(
                "UPDATE audit_log SET principal_id = ?, details = ?, hash = ? WHERE id = ?",
            )
            .bind(&event.principal_id)
            .bind(event.details.as_ref().map(|d| d.to_string()))
            .bind(&event.hash)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            affected += 1;
        }

        tx.commit().await?;
        info!(principal = principal_id, affected, "events pseudonymized");
        Ok(affected)
    }

    /// Delete a subject's events, keeping those whose action is excluded.
    pub async fn delete_events_for_principal(
        &self,
        principal_id: &str,
        exclude_actions: &[String],
    ) -> DatabaseResult<u64> {
        let mut sql = String::from("DELETE FROM audit_log WHERE principal_id = ?");
        if !exclude_actions.is_empty() {
            let placeholders = vec!["?"; exclude_actions.len()].join(", ");
            sql.push_str(&format!(" AND action NOT IN ({placeholders})"));
        }

        let mut query = sqlx::query(&sql).bind(principal_id);
        for action in exclude_actions {
            query = query.bind(action);
        }

        let result = query.execute(self.db.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Set `archived_at` on unarchived events of a classification whose
    /// timestamp is at or before the cutoff. Returns the touched rows for
    /// reporting.
    pub async fn archive_events(
        &self,
        classification: DataClassification,
        cutoff: DateTime<Utc>,
        archived_at: DateTime<Utc>,
    ) -> DatabaseResult<Vec<TouchedRow>> {
        let mut tx = self.db.pool().begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, action, timestamp FROM audit_log
            WHERE data_classification = ? AND timestamp <= ? AND archived_at IS NULL
            "#,
        )
        .bind(classification.as_str())
        .bind(fmt_ts(cutoff))
        .fetch_all(&mut *tx)
        .await?;

        let mut touched = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            sqlx::query("UPDATE audit_log SET archived_at = ? WHERE id = ?")
                .bind(fmt_ts(archived_at))
                .bind(id)
                .execute(&mut *tx)
                .await?;
            touched.push(TouchedRow {
                action: row.try_get("action")?,
                timestamp: parse_ts(row.try_get::<String, _>("timestamp")?.as_str())?,
            });
        }

        tx.commit().await?;
        Ok(touched)
    }

    /// Delete archived events of a classification whose timestamp is at or
    /// before the cutoff. Returns the deleted rows for reporting.
    pub async fn delete_archived_events(
        &self,
        classification: DataClassification,
        cutoff: DateTime<Utc>,
    ) -> DatabaseResult<Vec<TouchedRow>> {
        let mut tx = self.db.pool().begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, action, timestamp FROM audit_log
            WHERE data_classification = ? AND timestamp <= ? AND archived_at IS NOT NULL
            "#,
        )
        .bind(classification.as_str())
        .bind(fmt_ts(cutoff))
        .fetch_all(&mut *tx)
        .await?;

        let mut touched = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            sqlx::query("DELETE FROM audit_log WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            touched.push(TouchedRow {
                action: row.try_get("action")?,
                timestamp: parse_ts(row.try_get::<String, _>("timestamp")?.as_str())?,
            });
        }

        tx.commit().await?;
        Ok(touched)
    }
}

/// Map a database row back into the event model.
pub(crate) fn row_to_event(row: &SqliteRow) -> DatabaseResult<AuditEvent> {
    let status = EventStatus::parse(row.try_get::<String, _>("status")?.as_str())?;
    let classification =
        DataClassification::parse(row.try_get::<String, _>("data_classification")?.as_str())?;

    let session_id: Option<String> = row.try_get("session_id")?;
    let ip_address: Option<String> = row.try_get("ip_address")?;
    let user_agent: Option<String> = row.try_get("user_agent")?;
    let session_context =
        if session_id.is_some() || ip_address.is_some() || user_agent.is_some() {
            Some(SessionContext {
                session_id,
                ip_address,
                user_agent,
            })
        } else {
            None
        };

    let details = row
        .try_get::<Option<String>, _>("details")?
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| DatabaseError::QueryFailed(format!("invalid stored details: {e}")))
        })
        .transpose()?;

    Ok(AuditEvent {
        id: Some(row.try_get("id")?),
        timestamp: parse_ts(row.try_get::<String, _>("timestamp")?.as_str())?,
        principal_id: row.try_get("principal_id")?,
        organization_id: row.try_get("organization_id")?,
        action: row.try_get("action")?,
        status,
        target_resource_type: row.try_get("target_resource_type")?,
        target_resource_id: row.try_get("target_resource_id")?,
        outcome_description: row.try_get("outcome_description")?,
        data_classification: classification,
        retention_policy: row.try_get("retention_policy")?,
        correlation_id: row.try_get("correlation_id")?,
        session_context,
        details,
        hash: row.try_get("hash")?,
        hash_algorithm: row.try_get("hash_algorithm")?,
        event_version: row.try_get("event_version")?,
        processing_latency_ms: row.try_get("processing_latency_ms")?,
        archived_at: row
            .try_get::<Option<String>, _>("archived_at")?
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use integrity_engine::verify_event;

    use super::*;

    async fn repo() -> AuditLogRepository {
        AuditLogRepository::new(DatabasePool::in_memory().await.unwrap())
    }

    fn sealed(action: &str, principal: &str) -> AuditEvent {
        let mut event = AuditEvent::new(action, EventStatus::Success).with_principal(principal);
        seal_event(&mut event).unwrap();
        event
    }

    #[tokio::test]
    async fn test_insert_and_fetch_roundtrip() {
        let repo = repo().await;
        let event = sealed("auth.login.success", "u1");
        let key = event.hash.clone().unwrap();

        let outcome = repo.insert_event(&event, &key).await.unwrap();
        let InsertOutcome::Inserted(id) = outcome else {
            panic!("expected fresh insert");
        };

        let loaded = repo.fetch_by_id(id).await.unwrap();
        assert_eq!(loaded.action, "auth.login.success");
        assert_eq!(loaded.principal_id.as_deref(), Some("u1"));
        // The reconstructed row verifies against its stored hash.
        assert_eq!(
            verify_event(&loaded).unwrap(),
            integrity_engine::VerificationStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acknowledged() {
        let repo = repo().await;
        let event = sealed("data.read", "u1");
        let key = event.hash.clone().unwrap();

        let first = repo.insert_event(&event, &key).await.unwrap();
        let second = repo.insert_event(&event, &key).await.unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(matches!(second, InsertOutcome::Duplicate(id) if id == first.id()));
    }

    #[tokio::test]
    async fn test_conflicting_payload_same_key() {
        let repo = repo().await;
        let a = sealed("data.read", "u1");
        let b = sealed("data.write", "u1");

        repo.insert_event(&a, "producer-1:evt-9").await.unwrap();
        let err = repo.insert_event(&b, "producer-1:evt-9").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_query_by_principal_and_range() {
        let repo = repo().await;
        for (principal, day) in [("u1", 1), ("u1", 15), ("u2", 15)] {
            let mut event = AuditEvent::new("data.read", EventStatus::Success)
                .with_principal(principal)
                .with_timestamp(
                    format!("2024-01-{day:02}T08:00:00Z").parse().unwrap(),
                );
            seal_event(&mut event).unwrap();
            repo.insert_event(&event, event.hash.as_ref().unwrap())
                .await
                .unwrap();
        }

        let filter = EventFilter::for_principal("u1").in_range(
            "2024-01-10T00:00:00Z".parse().unwrap(),
            "2024-01-31T00:00:00Z".parse().unwrap(),
        );
        let events = repo.query(&filter).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].principal_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_pseudonymize_reseals_hash() {
        let repo = repo().await;
        let event = sealed("auth.login.failure", "subject-7");
        repo.insert_event(&event, event.hash.as_ref().unwrap())
            .await
            .unwrap();

        let affected = repo
            .pseudonymize_events("subject-7", "pseudo-abc123", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let events = repo
            .query(&EventFilter::for_principal("pseudo-abc123"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let rewritten = &events[0];
        assert_eq!(rewritten.details.as_ref().unwrap()["pseudonymized"], true);
        assert_eq!(
            verify_event(rewritten).unwrap(),
            integrity_engine::VerificationStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_pseudonymize_only_actions() {
        let repo = repo().await;
        for action in ["auth.login.failure", "data.read"] {
            let event = sealed(action, "subject-8");
            repo.insert_event(&event, event.hash.as_ref().unwrap())
                .await
                .unwrap();
        }

        let affected = repo
            .pseudonymize_events(
                "subject-8",
                "pseudo-def",
                Some(&["auth.login.failure".to_string()]),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let remaining = repo
            .query(&EventFilter::for_principal("subject-8"))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "data.read");
    }

    #[tokio::test]
    async fn test_delete_with_exclusions() {
        let repo = repo().await;
        for action in ["auth.login.failure", "data.read", "data.write"] {
            let event = sealed(action, "subject-9");
            repo.insert_event(&event, event.hash.as_ref().unwrap())
                .await
                .unwrap();
        }

        let deleted = repo
            .delete_events_for_principal("subject-9", &["auth.login.failure".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = repo
            .query(&EventFilter::for_principal("subject-9"))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "auth.login.failure");
    }

    #[tokio::test]
    async fn test_archive_then_delete_flow() {
        let repo = repo().await;
        let ages = [10i64, 45, 120];
        for age in ages {
            let mut event = AuditEvent::new("phi.access", EventStatus::Success)
                .with_classification(DataClassification::Phi)
                .with_timestamp(Utc::now() - chrono::Duration::days(age));
            seal_event(&mut event).unwrap();
            repo.insert_event(&event, event.hash.as_ref().unwrap())
                .await
                .unwrap();
        }

        let now = Utc::now();
        let archived = repo
            .archive_events(
                DataClassification::Phi,
                now - chrono::Duration::days(30),
                now,
            )
            .await
            .unwrap();
        assert_eq!(archived.len(), 2); // ages 45 and 120

        let deleted = repo
            .delete_archived_events(DataClassification::Phi, now - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1); // age 120

        let untouched = repo
            .query(&EventFilter {
                data_classification: Some(DataClassification::Phi),
                archived: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(untouched.len(), 1); // age 10
    }
}
