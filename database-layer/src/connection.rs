use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use crate::error::{DatabaseError, DatabaseResult};
use crate::schema;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Create a pool from a connection string and run schema setup.
    ///
    /// In-memory databases are pinned to a single connection so every query
    /// sees the same database.
    pub async fn new(connection_string: &str) -> DatabaseResult<Self> {
        let max_connections = if connection_string.contains(":memory:") {
            1
        } else {
            10
        };

        let options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        schema::initialize(&pool).await?;
        info!("database pool ready");

        Ok(Self { pool })
    }

    /// In-memory database for tests and ephemeral tooling.
    pub async fn in_memory() -> DatabaseResult<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn is_healthy(&self) -> bool {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "database health check failed");
                false
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("database pool closed");
    }
}
