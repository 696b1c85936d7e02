use chrono::{DateTime, Duration, Utc};
use database_layer::{fmt_ts, parse_ts, DatabasePool};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AlertError, AlertResult};
use crate::types::{
    Alert, AlertFilters, AlertSeverity, AlertSortBy, AlertStatistics, AlertType, SortOrder,
};

/// Org-scoped alert persistence.
#[derive(Clone)]
pub struct AlertStore {
    db: DatabasePool,
}

impl AlertStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Create an alert unless an unresolved alert with the same
    /// `{source, title, correlationKey}` already exists inside the
    /// deduplication window. Returns the created alert, or `None` when
    /// deduplicated.
    pub async fn create_alert(
        &self,
        alert: Alert,
        dedup_window: Duration,
    ) -> AlertResult<Option<Alert>> {
        let window_start = Utc::now() - dedup_window;

        let existing = sqlx::query(
            r#"
            SELECT id FROM alerts
            WHERE source = ? AND title = ?
              AND (correlation_key = ? OR (correlation_key IS NULL AND ? IS NULL))
              AND resolved = 0
              AND timestamp >= ?
            LIMIT 1
            "#,
        )
        .bind(&alert.source)
        .bind(&alert.title)
        .bind(&alert.correlation_key)
        .bind(&alert.correlation_key)
        .bind(fmt_ts(window_start))
        .fetch_optional(self.db.pool())
        .await?;

        if existing.is_some() {
            debug!(title = %alert.title, "alert deduplicated");
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, organization_id, alert_type, severity, source, title,
                description, correlation_key, timestamp, resolved
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(&alert.organization_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.source)
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(&alert.correlation_key)
        .bind(fmt_ts(alert.timestamp))
        .execute(self.db.pool())
        .await?;

        info!(
            alert = %alert.id,
            organization = %alert.organization_id,
            severity = alert.severity.as_str(),
            "alert raised"
        );
        Ok(Some(alert))
    }

    /// Query alerts. Always scoped to the filter's organization.
    pub async fn get_alerts(&self, filters: &AlertFilters) -> AlertResult<Vec<Alert>> {
        let mut sql = String::from("SELECT * FROM alerts WHERE organization_id = ?");
        let mut binds: Vec<String> = Vec::new();

        if let Some(severity) = filters.severity {
            sql.push_str(" AND severity = ?");
            binds.push(severity.as_str().to_string());
        }
        if let Some(alert_type) = filters.alert_type {
            sql.push_str(" AND alert_type = ?");
            binds.push(alert_type.as_str().to_string());
        }
        if let Some(source) = &filters.source {
            sql.push_str(" AND source = ?");
            binds.push(source.clone());
        }
        if let Some(resolved) = filters.resolved {
            sql.push_str(if resolved {
                " AND resolved = 1"
            } else {
                " AND resolved = 0"
            });
        }

        let column = match filters.sort_by {
            AlertSortBy::Timestamp => "timestamp",
            // CRITICAL > HIGH > MEDIUM > LOW when descending.
            AlertSortBy::Severity => {
                "CASE severity WHEN 'LOW' THEN 0 WHEN 'MEDIUM' THEN 1 WHEN 'HIGH' THEN 2 ELSE 3 END"
            }
        };
        let order = match filters.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {column} {order} LIMIT ? OFFSET ?"));

        let mut query = sqlx::query(&sql).bind(&filters.organization_id);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(filters.limit).bind(filters.offset);

        let rows = query.fetch_all(self.db.pool()).await?;
        rows.iter().map(row_to_alert).collect()
    }

    /// Unresolved alerts for an organization, most recent first.
    pub async fn get_active_alerts(&self, organization_id: &str) -> AlertResult<Vec<Alert>> {
        let mut filters = AlertFilters::for_organization(organization_id);
        filters.resolved = Some(false);
        filters.limit = i64::MAX;
        self.get_alerts(&filters).await
    }

    /// Resolve an alert. The caller's organization must own the alert.
    pub async fn resolve_alert(
        &self,
        id: Uuid,
        organization_id: &str,
        resolver: &str,
        notes: Option<&str>,
    ) -> AlertResult<Alert> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        let alert = row_to_alert(&row)?;
        if alert.organization_id != organization_id {
            return Err(AlertError::Forbidden(id.to_string()));
        }
        if alert.resolved {
            return Err(AlertError::AlreadyResolved(id.to_string()));
        }

        let resolved_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE alerts
            SET resolved = 1, resolved_at = ?, resolved_by = ?, resolution_notes = ?
            WHERE id = ? AND organization_id = ?
            "#,
        )
        .bind(fmt_ts(resolved_at))
        .bind(resolver)
        .bind(notes)
        .bind(id.to_string())
        .bind(organization_id)
        .execute(self.db.pool())
        .await?;

        Ok(Alert {
            resolved: true,
            resolved_at: Some(resolved_at),
            resolved_by: Some(resolver.to_string()),
            resolution_notes: notes.map(str::to_string),
            ..alert
        })
    }

    pub async fn get_alert_statistics(
        &self,
        organization_id: &str,
    ) -> AlertResult<AlertStatistics> {
        let mut filters = AlertFilters::for_organization(organization_id);
        filters.limit = i64::MAX;
        let alerts = self.get_alerts(&filters).await?;

        let mut stats = AlertStatistics {
            total: alerts.len() as u64,
            ..Default::default()
        };
        for alert in &alerts {
            if alert.resolved {
                stats.resolved += 1;
            } else {
                stats.active += 1;
            }
            *stats
                .by_severity
                .entry(alert.severity.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_type
                .entry(alert.alert_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    /// Drop resolved alerts older than the given number of days.
    pub async fn cleanup_resolved_alerts(
        &self,
        organization_id: &str,
        older_than_days: i64,
    ) -> AlertResult<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let result = sqlx::query(
            "DELETE FROM alerts WHERE organization_id = ? AND resolved = 1 AND timestamp < ?",
        )
        .bind(organization_id)
        .bind(fmt_ts(cutoff))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_alert(row: &SqliteRow) -> AlertResult<Alert> {
    let parse_time = |s: String| -> AlertResult<DateTime<Utc>> {
        parse_ts(&s).map_err(|e| AlertError::SqlxError(sqlx::Error::Decode(e.to_string().into())))
    };

    Ok(Alert {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())
            .map_err(|e| AlertError::SqlxError(sqlx::Error::Decode(e.to_string().into())))?,
        organization_id: row.try_get("organization_id")?,
        alert_type: AlertType::parse(row.try_get::<String, _>("alert_type")?.as_str())
            .unwrap_or(AlertType::System),
        severity: AlertSeverity::parse(row.try_get::<String, _>("severity")?.as_str())
            .unwrap_or(AlertSeverity::Low),
        source: row.try_get("source")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        correlation_key: row.try_get("correlation_key")?,
        timestamp: parse_time(row.try_get::<String, _>("timestamp")?)?,
        resolved: row.try_get::<i64, _>("resolved")? != 0,
        resolved_at: row
            .try_get::<Option<String>, _>("resolved_at")?
            .map(parse_time)
            .transpose()?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> AlertStore {
        AlertStore::new(DatabasePool::in_memory().await.unwrap())
    }

    fn security_alert(org: &str, title: &str) -> Alert {
        Alert::new(
            org,
            AlertType::Security,
            AlertSeverity::High,
            "monitor",
            title,
            "threshold exceeded",
        )
    }

    #[tokio::test]
    async fn test_create_and_query() {
        let store = store().await;
        store
            .create_alert(security_alert("org-1", "repeated login failures"), Duration::minutes(5))
            .await
            .unwrap()
            .expect("alert should be created");

        let alerts = store
            .get_alerts(&AlertFilters::for_organization("org-1"))
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }

    #[tokio::test]
    async fn test_org_isolation() {
        let store = store().await;
        store
            .create_alert(security_alert("org-1", "a"), Duration::minutes(5))
            .await
            .unwrap();
        store
            .create_alert(security_alert("org-2", "b"), Duration::minutes(5))
            .await
            .unwrap();

        let org1 = store
            .get_alerts(&AlertFilters::for_organization("org-1"))
            .await
            .unwrap();
        assert_eq!(org1.len(), 1);
        assert!(org1.iter().all(|a| a.organization_id == "org-1"));
    }

    #[tokio::test]
    async fn test_dedup_until_resolved() {
        let store = store().await;
        let alert = security_alert("org-1", "repeated login failures")
            .with_correlation_key("failed-logins:u1");

        let first = store
            .create_alert(alert.clone(), Duration::minutes(5))
            .await
            .unwrap();
        assert!(first.is_some());

        let duplicate = store
            .create_alert(
                security_alert("org-1", "repeated login failures")
                    .with_correlation_key("failed-logins:u1"),
                Duration::minutes(5),
            )
            .await
            .unwrap();
        assert!(duplicate.is_none());

        // Resolving the existing alert lifts the dedup.
        store
            .resolve_alert(first.unwrap().id, "org-1", "admin", Some("handled"))
            .await
            .unwrap();
        let after_resolve = store
            .create_alert(
                security_alert("org-1", "repeated login failures")
                    .with_correlation_key("failed-logins:u1"),
                Duration::minutes(5),
            )
            .await
            .unwrap();
        assert!(after_resolve.is_some());
    }

    #[tokio::test]
    async fn test_cross_org_resolve_forbidden() {
        let store = store().await;
        let alert = store
            .create_alert(security_alert("org-1", "a"), Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();

        let err = store
            .resolve_alert(alert.id, "org-2", "intruder", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = store().await;
        store
            .create_alert(security_alert("org-1", "a"), Duration::minutes(5))
            .await
            .unwrap();
        let resolved = store
            .create_alert(
                Alert::new(
                    "org-1",
                    AlertType::Compliance,
                    AlertSeverity::Critical,
                    "verifier",
                    "integrity mismatch",
                    "hash mismatch on event 7",
                ),
                Duration::minutes(5),
            )
            .await
            .unwrap()
            .unwrap();
        store
            .resolve_alert(resolved.id, "org-1", "admin", None)
            .await
            .unwrap();

        let stats = store.get_alert_statistics("org-1").await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.by_severity.get("HIGH"), Some(&1));
        assert_eq!(stats.by_type.get("COMPLIANCE"), Some(&1));
    }

    #[tokio::test]
    async fn test_severity_sort() {
        let store = store().await;
        for severity in [AlertSeverity::Low, AlertSeverity::Critical, AlertSeverity::Medium] {
            store
                .create_alert(
                    Alert::new("org-1", AlertType::System, severity, "m", format!("t-{severity:?}"), "d"),
                    Duration::minutes(5),
                )
                .await
                .unwrap();
        }

        let mut filters = AlertFilters::for_organization("org-1");
        filters.sort_by = AlertSortBy::Severity;
        filters.sort_order = SortOrder::Desc;
        let alerts = store.get_alerts(&filters).await.unwrap();
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[2].severity, AlertSeverity::Low);
    }

    #[tokio::test]
    async fn test_cleanup_resolved() {
        let store = store().await;
        let alert = store
            .create_alert(security_alert("org-1", "old"), Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        store
            .resolve_alert(alert.id, "org-1", "admin", None)
            .await
            .unwrap();

        // Nothing older than 30 days yet.
        assert_eq!(store.cleanup_resolved_alerts("org-1", 30).await.unwrap(), 0);
        // Everything older than "-1 days" (i.e. cutoff in the future).
        assert_eq!(store.cleanup_resolved_alerts("org-1", -1).await.unwrap(), 1);
    }
}
