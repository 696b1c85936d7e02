//! Shared plumbing for the operations CLIs (`archival-cli`, `audit-db`).
//!
//! Exit codes: 0 success, 1 runtime error, 2 configuration/validation error.

use std::path::PathBuf;
use std::sync::Arc;

use config_engine::{default_config_file, AuditConfig, ConfigEngine};
use database_layer::DatabasePool;
use error_common::{AuditError, AuditResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared CLI context: the live config engine, its snapshot, and an open
/// store.
pub struct CliContext {
    pub engine: ConfigEngine,
    pub config: Arc<AuditConfig>,
    pub db: DatabasePool,
}

impl CliContext {
    /// Resolve configuration (explicit `--config`, then the conventional file
    /// under `AUDIT_CONFIG_DIR`, then defaults plus env overrides) and open
    /// the store.
    pub async fn init(config_path: Option<PathBuf>) -> AuditResult<Self> {
        let engine = match config_path.or_else(default_config_file) {
            Some(path) => ConfigEngine::load_from_file(&path)?,
            None => {
                let mut config = AuditConfig::default();
                config.apply_env_overrides()?;
                ConfigEngine::new(config)?
            }
        };
        let config = engine.snapshot();
        let db = DatabasePool::new(&config.database.url)
            .await
            .map_err(AuditError::from)?;
        Ok(Self { engine, config, db })
    }

    /// Print the masked configuration snapshot (credentials and keys
    /// replaced), for operator inspection after successful verification.
    pub fn print_masked_config(&self) -> AuditResult<()> {
        let masked = self.engine.export_config(false)?;
        let rendered = serde_json::to_string_pretty(&masked)
            .map_err(|e| AuditError::internal(e.to_string()))?;
        println!("{rendered}");
        Ok(())
    }
}

pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Map an error to its process exit code and print it.
pub fn exit_with(err: AuditError) -> ! {
    eprintln!("error: {err}");
    std::process::exit(err.kind.exit_code());
}
