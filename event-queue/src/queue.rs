use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use integrity_engine::AuditEvent;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Queue behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub queue_name: String,
    /// Nacks before a job is dead-lettered.
    pub max_retries: u32,
    /// Default claim visibility window.
    pub visibility_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "audit-events".to_string(),
            max_retries: 3,
            visibility_timeout_ms: 30_000,
        }
    }
}

/// A claimed job.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: Uuid,
    pub event: AuditEvent,
    pub idempotency_key: Option<String>,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// A job parked on the dead-letter stream.
#[derive(Debug, Clone)]
pub struct DeadLetterJob {
    pub id: Uuid,
    pub event: AuditEvent,
    pub attempts: u32,
    pub reason: String,
    pub last_error: Option<String>,
    pub dead_at: DateTime<Utc>,
}

/// Depth counters surfaced to the monitor and the health endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub ready: u64,
    pub in_flight: u64,
    pub dead_letter: u64,
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite-backed reliable queue.
#[derive(Clone)]
pub struct ReliableQueue {
    pool: SqlitePool,
    config: QueueConfig,
}

impl ReliableQueue {
    /// Connect and create the queue tables if needed.
    pub async fn connect(connection_string: &str, config: QueueConfig) -> QueueResult<Self> {
        let max_connections = if connection_string.contains(":memory:") {
            1
        } else {
            10
        };
        let options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let queue = Self { pool, config };
        queue.initialize_schema().await?;
        info!(queue = %queue.config.queue_name, "reliable queue ready");
        Ok(queue)
    }

    pub async fn in_memory(config: QueueConfig) -> QueueResult<Self> {
        Self::connect("sqlite::memory:", config).await
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn initialize_schema(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_queue (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                idempotency_key TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at TEXT NOT NULL,
                claimed_until TEXT,
                last_error TEXT,
                enqueued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_ready ON event_queue(queue_name, available_at, claimed_until)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letter (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                idempotency_key TEXT,
                attempts INTEGER NOT NULL,
                reason TEXT NOT NULL,
                last_error TEXT,
                dead_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dead_letter_queue ON dead_letter(queue_name, dead_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Enqueue an event for immediate delivery.
    pub async fn enqueue(
        &self,
        event: &AuditEvent,
        idempotency_key: Option<String>,
    ) -> QueueResult<Uuid> {
        self.enqueue_delayed(event, idempotency_key, Duration::ZERO)
            .await
    }

    /// Enqueue an event that becomes claimable after `delay`.
    pub async fn enqueue_delayed(
        &self,
        event: &AuditEvent,
        idempotency_key: Option<String>,
        delay: Duration,
    ) -> QueueResult<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let available_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let payload = serde_json::to_string(event)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO event_queue (
                id, queue_name, payload, idempotency_key,
                attempts, available_at, claimed_until, enqueued_at
            ) VALUES (?, ?, ?, ?, 0, ?, NULL, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&self.config.queue_name)
        .bind(payload)
        .bind(idempotency_key)
        .bind(fmt_ts(available_at))
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await?;

        debug!(job = %id, "event enqueued");
        Ok(id)
    }

    /// Claim up to `count` ready jobs for `visibility_timeout`.
    ///
    /// A job is ready when its `available_at` has passed and it is either
    /// unclaimed or its previous claim expired (re-delivery).
    pub async fn claim(
        &self,
        count: u32,
        visibility_timeout: Duration,
    ) -> QueueResult<Vec<QueueJob>> {
        let now = Utc::now();
        let claim_until =
            now + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::zero());

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, payload, idempotency_key, attempts, enqueued_at
            FROM event_queue
            WHERE queue_name = ?
              AND available_at <= ?
              AND (claimed_until IS NULL OR claimed_until <= ?)
            ORDER BY available_at ASC
            LIMIT ?
            "#,
        )
        .bind(&self.config.queue_name)
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id_str: String = row.try_get("id")?;
            sqlx::query("UPDATE event_queue SET claimed_until = ? WHERE id = ?")
                .bind(fmt_ts(claim_until))
                .bind(&id_str)
                .execute(&mut *tx)
                .await?;

            let payload: String = row.try_get("payload")?;
            let event: AuditEvent = serde_json::from_str(&payload)
                .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;

            jobs.push(QueueJob {
                id: Uuid::parse_str(&id_str)
                    .map_err(|e| QueueError::InvalidPayload(e.to_string()))?,
                event,
                idempotency_key: row.try_get("idempotency_key")?,
                attempts: row.try_get::<i64, _>("attempts")? as u32,
                enqueued_at: DateTime::parse_from_rfc3339(
                    row.try_get::<String, _>("enqueued_at")?.as_str(),
                )
                .map_err(|e| QueueError::InvalidPayload(e.to_string()))?
                .with_timezone(&Utc),
            });
        }

        tx.commit().await?;
        Ok(jobs)
    }

    /// Acknowledge a job: processing finished, the job is gone.
    pub async fn ack(&self, job_id: Uuid) -> QueueResult<()> {
        let result = sqlx::query("DELETE FROM event_queue WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Negative-acknowledge a job. Increments the attempt counter; once it
    /// reaches `max_retries` the job moves to the dead-letter stream.
    pub async fn nack(&self, job_id: Uuid, error: &str) -> QueueResult<()> {
        let attempts: u32 = {
            let row = sqlx::query("SELECT attempts FROM event_queue WHERE id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
            row.try_get::<i64, _>("attempts")? as u32 + 1
        };

        if attempts >= self.config.max_retries {
            self.dead_letter_internal(job_id, "retries exhausted", Some(error))
                .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE event_queue
            SET attempts = ?, last_error = ?, claimed_until = NULL, available_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(error)
        .bind(fmt_ts(Utc::now()))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        debug!(job = %job_id, attempts, "job nacked for redelivery");
        Ok(())
    }

    /// Release a job for redelivery after `delay`, keeping its attempt count.
    pub async fn schedule_retry(&self, job_id: Uuid, delay: Duration) -> QueueResult<()> {
        let available_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let result = sqlx::query(
            "UPDATE event_queue SET claimed_until = NULL, available_at = ? WHERE id = ?",
        )
        .bind(fmt_ts(available_at))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Move a job straight to the dead-letter stream.
    pub async fn dead_letter(&self, job_id: Uuid, reason: &str) -> QueueResult<()> {
        self.dead_letter_internal(job_id, reason, None).await
    }

    async fn dead_letter_internal(
        &self,
        job_id: Uuid,
        reason: &str,
        last_error: Option<&str>,
    ) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT payload, idempotency_key, attempts, last_error FROM event_queue WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        let stored_error: Option<String> = row.try_get("last_error")?;
        let final_error = last_error.map(str::to_string).or(stored_error);

        sqlx::query(
            r#"
            INSERT INTO dead_letter (
                id, queue_name, payload, idempotency_key,
                attempts, reason, last_error, dead_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id.to_string())
        .bind(&self.config.queue_name)
        .bind(row.try_get::<String, _>("payload")?)
        .bind(row.try_get::<Option<String>, _>("idempotency_key")?)
        .bind(row.try_get::<i64, _>("attempts")? + 1)
        .bind(reason)
        .bind(final_error)
        .bind(fmt_ts(Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM event_queue WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        warn!(job = %job_id, reason, "job moved to dead-letter stream");
        Ok(())
    }

    /// Ready / in-flight / dead-letter depths.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let now = fmt_ts(Utc::now());

        let ready: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM event_queue
            WHERE queue_name = ? AND available_at <= ?
              AND (claimed_until IS NULL OR claimed_until <= ?)
            "#,
        )
        .bind(&self.config.queue_name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let in_flight: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM event_queue
            WHERE queue_name = ? AND claimed_until IS NOT NULL AND claimed_until > ?
            "#,
        )
        .bind(&self.config.queue_name)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let dead_letter: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM dead_letter WHERE queue_name = ?")
                .bind(&self.config.queue_name)
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;

        Ok(QueueStats {
            ready: ready as u64,
            in_flight: in_flight as u64,
            dead_letter: dead_letter as u64,
        })
    }

    /// Inspect the dead-letter stream, newest first.
    pub async fn dead_letter_jobs(&self, limit: u32) -> QueueResult<Vec<DeadLetterJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, attempts, reason, last_error, dead_at
            FROM dead_letter
            WHERE queue_name = ?
            ORDER BY dead_at DESC
            LIMIT ?
            "#,
        )
        .bind(&self.config.queue_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                Ok(DeadLetterJob {
                    id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())
                        .map_err(|e| QueueError::InvalidPayload(e.to_string()))?,
                    event: serde_json::from_str(&payload)
                        .map_err(|e| QueueError::InvalidPayload(e.to_string()))?,
                    attempts: row.try_get::<i64, _>("attempts")? as u32,
                    reason: row.try_get("reason")?,
                    last_error: row.try_get("last_error")?,
                    dead_at: DateTime::parse_from_rfc3339(
                        row.try_get::<String, _>("dead_at")?.as_str(),
                    )
                    .map_err(|e| QueueError::InvalidPayload(e.to_string()))?
                    .with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Drop dead-letter entries older than the retention window.
    pub async fn purge_dead_letter(&self, older_than: DateTime<Utc>) -> QueueResult<u64> {
        let result =
            sqlx::query("DELETE FROM dead_letter WHERE queue_name = ? AND dead_at < ?")
                .bind(&self.config.queue_name)
                .bind(fmt_ts(older_than))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
