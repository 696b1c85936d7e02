use sqlx::SqlitePool;

use crate::error::DatabaseResult;

/// Create all tables and indexes if they do not exist.
///
/// Column names and defaults follow the platform schema manifest:
/// hashes stored hex, `data_classification` defaulting to `INTERNAL`,
/// `retention_policy` defaulting to `standard`.
pub async fn initialize(pool: &SqlitePool) -> DatabaseResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            principal_id TEXT,
            organization_id TEXT,
            action TEXT NOT NULL,
            status TEXT NOT NULL,
            target_resource_type TEXT,
            target_resource_id TEXT,
            outcome_description TEXT,
            data_classification VARCHAR(20) NOT NULL DEFAULT 'INTERNAL',
            retention_policy VARCHAR(50) NOT NULL DEFAULT 'standard',
            correlation_id TEXT,
            session_id TEXT,
            ip_address TEXT,
            user_agent TEXT,
            details TEXT,
            hash TEXT,
            hash_algorithm TEXT NOT NULL DEFAULT 'SHA-256',
            event_version TEXT NOT NULL DEFAULT '1.0',
            processing_latency_ms INTEGER,
            idempotency_key TEXT UNIQUE,
            archived_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_audit_principal ON audit_log(principal_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_organization ON audit_log(organization_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action)",
        "CREATE INDEX IF NOT EXISTS idx_audit_status ON audit_log(status)",
        "CREATE INDEX IF NOT EXISTS idx_audit_hash ON audit_log(hash)",
        "CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(target_resource_type, target_resource_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_correlation ON audit_log(correlation_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_classification ON audit_log(data_classification)",
        "CREATE INDEX IF NOT EXISTS idx_audit_retention ON audit_log(retention_policy)",
        "CREATE INDEX IF NOT EXISTS idx_audit_archived ON audit_log(archived_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_ts_status ON audit_log(timestamp, status)",
        "CREATE INDEX IF NOT EXISTS idx_audit_principal_action ON audit_log(principal_id, action)",
        "CREATE INDEX IF NOT EXISTS idx_audit_class_retention ON audit_log(data_classification, retention_policy)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_integrity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            audit_log_id INTEGER NOT NULL,
            verified_at TEXT NOT NULL,
            status TEXT NOT NULL,
            expected_hash TEXT,
            observed_hash TEXT,
            verified_by TEXT NOT NULL,
            details TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_integrity_audit_log ON audit_integrity_log(audit_log_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_retention_policy (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            policy_name TEXT NOT NULL UNIQUE,
            data_classification VARCHAR(20) NOT NULL,
            retention_days INTEGER NOT NULL,
            archive_after_days INTEGER,
            delete_after_days INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pseudonym_mapping (
            original_id TEXT PRIMARY KEY,
            pseudonym_id TEXT NOT NULL UNIQUE,
            strategy TEXT NOT NULL,
            created_at TEXT NOT NULL,
            context TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reverse lookups must be O(log n); the UNIQUE constraint above already
    // indexes pseudonym_id, this keeps the intent explicit.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pseudonym_reverse ON pseudonym_mapping(pseudonym_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            alert_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            source TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            correlation_key TEXT,
            timestamp TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at TEXT,
            resolved_by TEXT,
            resolution_notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_alerts_org ON alerts(organization_id)",
        "CREATE INDEX IF NOT EXISTS idx_alerts_org_resolved ON alerts(organization_id, resolved)",
        "CREATE INDEX IF NOT EXISTS idx_alerts_dedup ON alerts(source, title, correlation_key)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
