use std::path::PathBuf;

use alert_monitor::AlertStore;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config_engine::require_pseudonym_salt;
use database_layer::{AuditLogRepository, EventFilter, IntegrityVerifier, SweepSelection};
use error_common::{AuditError, AuditResult};
use event_queue::{QueueConfig, ReliableQueue};
use gdpr_engine::{ExportFormat, ExportRequest, GdprEngine, PseudonymRegistry};
use ops_cli::{exit_with, init_tracing, CliContext};

/// Archival and data lifecycle operations on the audit store.
#[derive(Parser, Debug)]
#[command(name = "archival-cli")]
#[command(about = "Retention, archival, and GDPR lifecycle operations")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply active retention policies (archive, then delete)
    Archive,
    /// Purge expired dead-letter entries and old resolved alerts
    Cleanup {
        #[arg(long)]
        organization: String,
        /// Resolved alerts older than this many days are removed
        #[arg(long, default_value_t = 30)]
        older_than_days: i64,
    },
    /// Erase a data subject, preserving compliance-critical audit records
    Delete {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        requested_by: String,
        /// Delete everything, including compliance records
        #[arg(long)]
        no_preserve: bool,
    },
    /// Export a data subject's events to a file
    Retrieve {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        requested_by: String,
        #[arg(long, value_parser = parse_format, default_value = "json")]
        format: ExportFormat,
        #[arg(long)]
        output: PathBuf,
    },
    /// Store and queue statistics
    Stats,
    /// Verify stored event integrity over a time range
    Validate {
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    match s {
        "json" => Ok(ExportFormat::Json),
        "csv" => Ok(ExportFormat::Csv),
        "xml" => Ok(ExportFormat::Xml),
        other => Err(format!("unknown format {other} (json|csv|xml)")),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args).await {
        exit_with(err);
    }
}

async fn run(args: Args) -> AuditResult<()> {
    let ctx = CliContext::init(args.config).await?;

    match args.command {
        Command::Archive => {
            let engine = gdpr(&ctx)?;
            let reports = engine
                .apply_retention_policies("archival-cli")
                .await
                .map_err(AuditError::from)?;
            for report in &reports {
                println!(
                    "{}: archived={} deleted={}",
                    report.policy_name, report.records_archived, report.records_deleted
                );
            }
            println!("{} policies applied", reports.len());
        }

        Command::Cleanup {
            organization,
            older_than_days,
        } => {
            let queue = open_queue(&ctx).await?;
            let retention_ms = ctx.config.dead_letter.max_retention_time;
            let cutoff = Utc::now() - chrono::Duration::milliseconds(retention_ms as i64);
            let purged = queue
                .purge_dead_letter(cutoff)
                .await
                .map_err(AuditError::from)?;

            let alerts = AlertStore::new(ctx.db.clone());
            let removed = alerts
                .cleanup_resolved_alerts(&organization, older_than_days)
                .await
                .map_err(AuditError::from)?;
            println!("purged {purged} dead-letter entries, removed {removed} resolved alerts");
        }

        Command::Delete {
            principal,
            requested_by,
            no_preserve,
        } => {
            let engine = gdpr(&ctx)?;
            let result = engine
                .delete_user_data_with_audit_trail(&principal, &requested_by, !no_preserve)
                .await
                .map_err(AuditError::from)?;
            println!(
                "deleted {} records, preserved {} compliance records",
                result.records_deleted, result.compliance_records_preserved
            );
        }

        Command::Retrieve {
            principal,
            requested_by,
            format,
            output,
        } => {
            let engine = gdpr(&ctx)?;
            let result = engine
                .export_user_data(
                    ExportRequest::access(&principal, &requested_by).with_format(format),
                )
                .await
                .map_err(AuditError::from)?;
            std::fs::write(&output, &result.data)
                .map_err(|e| AuditError::internal(format!("write {}: {e}", output.display())))?;
            println!(
                "exported {} records ({} bytes) to {}",
                result.record_count,
                result.data_size,
                output.display()
            );
        }

        Command::Stats => {
            let repo = AuditLogRepository::new(ctx.db.clone());
            let total = repo
                .count(&EventFilter::default())
                .await
                .map_err(AuditError::from)?;
            let archived = repo
                .count(&EventFilter {
                    archived: Some(true),
                    ..Default::default()
                })
                .await
                .map_err(AuditError::from)?;

            let queue = open_queue(&ctx).await?;
            let queue_stats = queue.stats().await.map_err(AuditError::from)?;

            println!("events: total={total} archived={archived}");
            println!(
                "queue: ready={} in_flight={} dead_letter={}",
                queue_stats.ready, queue_stats.in_flight, queue_stats.dead_letter
            );
        }

        Command::Validate { from, to } => {
            let verifier = IntegrityVerifier::new(ctx.db.clone());
            let selection = SweepSelection::TimeRange {
                from: from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                to: to.unwrap_or_else(Utc::now),
            };
            let result = verifier
                .sweep(selection, "archival-cli")
                .await
                .map_err(AuditError::from)?;
            println!(
                "checked={} ok={} mismatched={} missing_hash={}",
                result.summary.checked,
                result.summary.ok,
                result.summary.mismatched,
                result.summary.missing_hash
            );
            if result.summary.mismatched > 0 {
                return Err(AuditError::new(
                    error_common::ErrorKind::IntegrityMismatch,
                    format!("{} events failed verification", result.summary.mismatched),
                ));
            }
        }
    }

    Ok(())
}

fn gdpr(ctx: &CliContext) -> AuditResult<GdprEngine> {
    let salt = require_pseudonym_salt()?;
    let registry = PseudonymRegistry::new(ctx.db.clone(), salt).map_err(AuditError::from)?;
    Ok(GdprEngine::new(ctx.db.clone(), registry))
}

async fn open_queue(ctx: &CliContext) -> AuditResult<ReliableQueue> {
    ReliableQueue::connect(
        &ctx.config.database.url,
        QueueConfig {
            queue_name: ctx.config.worker.queue_name.clone(),
            max_retries: ctx.config.retry.max_attempts,
            visibility_timeout_ms: 30_000,
        },
    )
    .await
    .map_err(AuditError::from)
}
