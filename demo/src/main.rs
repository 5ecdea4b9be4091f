//! Custodian Maintenance Reference Runtime — Demo CLI
//!
//! Runs the in-memory demo scenarios, or works against a JSON-lines audit
//! log on disk.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- work-orders
//!   cargo run -p demo -- tamper
//!   cargo run -p demo -- rebuild
//!   cargo run -p demo -- load
//!   cargo run -p demo -- seed --log audit.jsonl
//!   cargo run -p demo -- verify --log audit.jsonl --role Auditor
//!   cargo run -p demo -- rebuild-file --log audit.jsonl --actor root \
//!       --role SystemAdministrator --confirm "REBUILD AUDIT CHAIN"

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use custodian_audit::JsonLinesAuditStore;
use custodian_contracts::error::CustodianResult;
use custodian_policy::AuditPolicy;
use custodian_ref_maintenance::scenarios::{
    chain_rebuild, concurrent_load, tamper_detection, work_order_lifecycle, AuditRuntime,
    MAINTENANCE_POLICY,
};
use custodian_verify::{ensure_valid, RebuildRequest};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Custodian — tamper-evident audit log maintenance demo.
///
/// Each subcommand runs one or all of the demo scenarios, or verifies and
/// rebuilds an audit log file.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Custodian maintenance reference runtime demo",
    long_about = "Runs Custodian demo scenarios showing hash-chained audit recording,\n\
                  tamper detection, privileged chain rebuild, and concurrent load."
)]
struct Cli {
    /// Audit policy TOML.  Defaults to the embedded maintenance policy.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four scenarios in sequence.
    RunAll,
    /// Scenario 1: Work Order Lifecycle (every recorder operation).
    WorkOrders,
    /// Scenario 2: Tamper Detection (edited and deleted records).
    Tamper,
    /// Scenario 3: Chain Rebuild (role and confirmation gates).
    Rebuild,
    /// Scenario 4: Concurrent Load (20 producers × 50 events).
    Load,
    /// Append the work order lifecycle to an audit log file.
    Seed {
        #[arg(long)]
        log: PathBuf,
    },
    /// Verify the hash chain of an audit log file.
    Verify {
        #[arg(long)]
        log: PathBuf,
        #[arg(long, default_value = "auditor")]
        actor: String,
        #[arg(long = "role", default_value = "Auditor")]
        roles: Vec<String>,
        /// Only check records created at or after this RFC 3339 time.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Only check records created at or before this RFC 3339 time.
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Recompute every sequence number and hash in an audit log file.
    RebuildFile {
        #[arg(long)]
        log: PathBuf,
        #[arg(long)]
        actor: String,
        #[arg(long = "role", required = true)]
        roles: Vec<String>,
        /// The exact confirmation phrase.
        #[arg(long, default_value = "")]
        confirm: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all().await,
        Command::WorkOrders => work_order_lifecycle::run_scenario().await,
        Command::Tamper => tamper_detection::run_scenario().await,
        Command::Rebuild => chain_rebuild::run_scenario().await,
        Command::Load => concurrent_load::run_scenario().await,
        Command::Seed { log } => seed_file(cli.policy.as_deref(), &log).await,
        Command::Verify {
            log,
            actor,
            roles,
            from,
            to,
        } => verify_file(cli.policy.as_deref(), &log, &actor, &roles, from, to).await,
        Command::RebuildFile {
            log,
            actor,
            roles,
            confirm,
        } => {
            let request = RebuildRequest::new(actor, roles, confirm);
            rebuild_file(cli.policy.as_deref(), &log, request).await
        }
    };

    match result {
        Ok(()) => {
            println!("Done.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run_all() -> CustodianResult<()> {
    work_order_lifecycle::run_scenario().await?;
    tamper_detection::run_scenario().await?;
    chain_rebuild::run_scenario().await?;
    concurrent_load::run_scenario().await?;
    Ok(())
}

// ── Audit log files ───────────────────────────────────────────────────────────

fn load_policy(path: Option<&Path>) -> CustodianResult<AuditPolicy> {
    match path {
        Some(path) => AuditPolicy::from_file(path),
        None => AuditPolicy::from_toml_str(MAINTENANCE_POLICY),
    }
}

async fn open_file_runtime(
    policy: Option<&Path>,
    log: &Path,
) -> CustodianResult<AuditRuntime<JsonLinesAuditStore>> {
    let policy = load_policy(policy)?;
    let store = Arc::new(JsonLinesAuditStore::open(log).await?);
    info!(log = %log.display(), "audit log opened");
    AuditRuntime::start(store, policy).await
}

async fn seed_file(policy: Option<&Path>, log: &Path) -> CustodianResult<()> {
    let runtime = open_file_runtime(policy, log).await?;
    let outcome = work_order_lifecycle::drive(&runtime).await?;
    let stats = runtime.shutdown().await?;
    println!(
        "  Appended {} record(s) to {}; log now holds {} record(s).",
        stats.persisted,
        log.display(),
        outcome.records.len()
    );
    Ok(())
}

async fn verify_file(
    policy: Option<&Path>,
    log: &Path,
    actor: &str,
    roles: &[String],
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> CustodianResult<()> {
    let runtime = open_file_runtime(policy, log).await?;
    if let Err(e) = runtime.verifier.authorize_verify(actor, roles) {
        runtime.shutdown().await?;
        return Err(e);
    }
    runtime.act_as(actor, actor, "127.0.0.1");

    let result = runtime.verifier.verify_chain(from, to).await;
    runtime.shutdown().await?;
    let report = result?;

    println!("  Log:            {}", log.display());
    println!("  Records checked: {}", report.total_checked);
    println!(
        "  Result:          {}",
        if report.is_valid { "VALID" } else { "INVALID" }
    );
    for issue in &report.issues {
        println!(
            "    #{:<5} {:<17} {}",
            issue.sequence_number, issue.issue_type, issue.description
        );
    }
    ensure_valid(&report)
}

async fn rebuild_file(
    policy: Option<&Path>,
    log: &Path,
    request: RebuildRequest,
) -> CustodianResult<()> {
    let runtime = open_file_runtime(policy, log).await?;
    runtime.act_as(&request.actor, &request.actor, "127.0.0.1");

    let result = runtime.verifier.rebuild_chain(request).await;
    runtime.shutdown().await?;
    let summary = result?;

    println!("  Log:               {}", log.display());
    println!("  Records rewritten: {}", summary.records_rewritten);
    println!("  Hashes changed:    {}", summary.hashes_changed);
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Custodian — Tamper-evident Audit Log");
    println!("Maintenance Reference Demo");
    println!("====================================");
    println!();
    println!("Audit pipeline per event:");
    println!("  [1] Recorder builds the entry: actor context, clock time, retention");
    println!("  [2] Entry joins an unbounded queue; the caller never waits");
    println!("  [3] Batch writer dequeues in FIFO order and refreshes the chain tail");
    println!("  [4] Each entry is sequenced and SHA-256 chained to its predecessor");
    println!("  [5] The batch is persisted in one append, retried until it lands");
    println!();
}
