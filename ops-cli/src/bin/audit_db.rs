use std::path::PathBuf;

use alert_monitor::{AlertStore, EventMonitor, MonitorConfig};
use clap::{Parser, Subcommand};
use database_layer::{
    AuditLogRepository, EventFilter, IntegrityVerifier, RetentionPolicy,
    RetentionPolicyRepository, SweepSelection,
};
use error_common::{AuditError, AuditResult, ErrorKind};
use integrity_engine::verify_event;
use ops_cli::{exit_with, init_tracing, CliContext};

/// Audit database administration.
#[derive(Parser, Debug)]
#[command(name = "audit-db")]
#[command(about = "Audit store administration and verification")]
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
    /// Deactivate a retention policy by name
    Rollback {
        #[arg(long)]
        policy: String,
    },
    /// Load retention policies from a JSON file
    SeedPolicies {
        #[arg(long)]
        file: PathBuf,
    },
    /// Seed the built-in compliance retention presets
    SeedPresets,
    /// Integrity sweep for an organization or the whole store
    Verify {
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        id: Option<i64>,
    },
    /// Check cross-cutting compliance invariants of the store
    VerifyCompliance,
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
    let policies = RetentionPolicyRepository::new(ctx.db.clone());

    match args.command {
        Command::Rollback { policy } => {
            let deactivated = policies
                .deactivate(&policy)
                .await
                .map_err(AuditError::from)?;
            if !deactivated {
                return Err(AuditError::new(
                    ErrorKind::ConfigValidation,
                    format!("no active policy named {policy}"),
                ));
            }
            println!("policy {policy} deactivated");
        }

        Command::SeedPolicies { file } => {
            let raw = std::fs::read(&file)
                .map_err(|e| AuditError::new(ErrorKind::ConfigValidation, e.to_string()))?;
            let seeded: Vec<RetentionPolicy> = serde_json::from_slice(&raw)
                .map_err(|e| AuditError::new(ErrorKind::ConfigValidation, e.to_string()))?;
            for policy in &seeded {
                policies.upsert(policy).await.map_err(AuditError::from)?;
                println!("seeded {}", policy.policy_name);
            }
            println!("{} policies seeded", seeded.len());
        }

        Command::SeedPresets => {
            let count = policies.seed_presets().await.map_err(AuditError::from)?;
            println!("{count} preset policies seeded");
        }

        Command::Verify { organization, id } => {
            let verifier = IntegrityVerifier::new(ctx.db.clone());
            let selection = match (organization, id) {
                (_, Some(id)) => SweepSelection::ById(id),
                (Some(org), None) => SweepSelection::Organization(org),
                (None, None) => SweepSelection::TimeRange {
                    from: chrono::DateTime::<chrono::Utc>::MIN_UTC,
                    to: chrono::Utc::now(),
                },
            };
            let result = verifier
                .sweep(selection, "audit-db")
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
                // Every mismatch raises a COMPLIANCE/HIGH alert for the
                // owning organization.
                let repo = AuditLogRepository::new(ctx.db.clone());
                let monitor = EventMonitor::new(
                    AlertStore::new(ctx.db.clone()),
                    MonitorConfig::default(),
                );
                for id in &result.mismatched_ids {
                    let organization = repo
                        .fetch_by_id(*id)
                        .await
                        .ok()
                        .and_then(|e| e.organization_id)
                        .unwrap_or_else(|| "platform".to_string());
                    monitor
                        .observe_integrity_mismatch(&organization, *id)
                        .await
                        .map_err(AuditError::from)?;
                }
                return Err(AuditError::new(
                    ErrorKind::IntegrityMismatch,
                    format!("{} events failed verification", result.summary.mismatched),
                ));
            }
            ctx.print_masked_config()?;
        }

        Command::VerifyCompliance => {
            let repo = AuditLogRepository::new(ctx.db.clone());
            let events = repo
                .query(&EventFilter::default())
                .await
                .map_err(AuditError::from)?;

            let mut unsealed = 0u64;
            let mut unverifiable = 0u64;
            for event in &events {
                match verify_event(event)? {
                    integrity_engine::VerificationStatus::Ok => {}
                    integrity_engine::VerificationStatus::MissingHash => unsealed += 1,
                    integrity_engine::VerificationStatus::Mismatch { .. } => unverifiable += 1,
                }
            }

            let active = policies.list_active().await.map_err(AuditError::from)?;
            let mut invalid_policies = 0u64;
            for policy in &active {
                if policy.validate().is_err() {
                    invalid_policies += 1;
                    println!("invalid policy: {}", policy.policy_name);
                }
            }

            println!(
                "events={} unsealed={} mismatched={} activePolicies={} invalidPolicies={}",
                events.len(),
                unsealed,
                unverifiable,
                active.len(),
                invalid_policies
            );

            if unsealed + unverifiable + invalid_policies > 0 {
                return Err(AuditError::new(
                    ErrorKind::IntegrityMismatch,
                    "compliance verification found violations",
                ));
            }
            println!("compliance verification passed");
            ctx.print_masked_config()?;
        }
    }

    Ok(())
}
