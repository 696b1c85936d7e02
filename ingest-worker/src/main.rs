use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alert_monitor::{AlertStore, EventMonitor, MonitorConfig};
use clap::Parser;
use config_engine::{default_config_file, require_pseudonym_salt, AuditConfig, ConfigEngine};
use database_layer::{AuditLogRepository, DatabasePool};
use event_queue::{QueueConfig, ReliableQueue};
use ingest_worker::{health_router, HealthState, IngestWorker, WorkerOptions};
use resilience::ResilientExecutor;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Audit event ingestion worker.
#[derive(Parser, Debug)]
#[command(name = "audit-worker")]
#[command(about = "Compliance-grade audit event ingestion worker")]
struct Args {
    /// Configuration file path (plain or encrypted JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args).await {
        error!(error = %err, "worker startup failed");
        std::process::exit(err.kind.exit_code());
    }
}

async fn run(args: Args) -> Result<(), error_common::AuditError> {
    // Explicit --config wins, then the conventional file under
    // AUDIT_CONFIG_DIR, then defaults with env overrides.
    let engine = match args.config.clone().or_else(default_config_file) {
        Some(path) => Arc::new(ConfigEngine::load_from_file(&path)?),
        None => {
            let mut config = AuditConfig::default();
            config.apply_env_overrides()?;
            Arc::new(ConfigEngine::new(config)?)
        }
    };
    let config = engine.snapshot();

    // The pseudonymization salt has no fallback; fail fast before any
    // component starts.
    let _salt = require_pseudonym_salt()?;

    info!(
        environment = ?config.environment,
        queue = %config.worker.queue_name,
        concurrency = config.worker.concurrency,
        "starting audit worker"
    );

    let db = DatabasePool::new(&config.database.url)
        .await
        .map_err(error_common::AuditError::from)?;
    let queue = ReliableQueue::connect(
        &config.database.url,
        QueueConfig {
            queue_name: config.worker.queue_name.clone(),
            max_retries: config.retry.max_attempts,
            visibility_timeout_ms: 30_000,
        },
    )
    .await
    .map_err(error_common::AuditError::from)?;

    let monitor = Arc::new(EventMonitor::new(
        AlertStore::new(db.clone()),
        MonitorConfig {
            dead_letter_alert_threshold: config.dead_letter.alert_threshold,
            ..MonitorConfig::default()
        },
    ));
    let executor = ResilientExecutor::new(
        config.retry.clone(),
        config.circuit_breaker.clone(),
    );
    let worker = IngestWorker::new(
        queue.clone(),
        AuditLogRepository::new(db.clone()),
        executor,
        monitor,
        WorkerOptions {
            concurrency: config.worker.concurrency,
            visibility_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_millis(config.worker.shutdown_timeout),
            ..WorkerOptions::default()
        },
    );

    // Health endpoint.
    let health = health_router(HealthState {
        db: db.clone(),
        queue: queue.clone(),
        metrics: worker.metrics(),
    });
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.worker.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| error_common::AuditError::internal(format!("bind {addr}: {e}")))?;
    info!("health endpoint on http://{addr}/healthz");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, health).await {
            error!(error = %err, "health server error");
        }
    });

    // Configuration polling.
    engine.spawn_watcher(Duration::from_millis(
        config.monitoring.health_check_interval,
    ));

    // Run the worker until ctrl-c.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| error_common::AuditError::internal(e.to_string()))?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    db.close().await;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).json())
        .init();
}
