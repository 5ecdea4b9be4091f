//! Scenario 3: Chain Rebuild
//!
//! Shows the three gates on the destructive rebuild and what it does:
//!
//!   A. A maintenance manager asks for a rebuild      → Unauthorized
//!   B. An administrator forgets the confirmation     → ConfirmationRequired
//!   C. An administrator rebuilds a damaged chain     → chain valid again,
//!      tamper evidence gone, bracketed by CRITICAL CHAIN_REBUILD records
//!   D. Rebuilding the now-clean chain again          → no hash changes
//!
//! Every refusal is itself on the record.

use custodian_audit::InMemoryAuditStore;
use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    integrity::RebuildSummary,
    taxonomy::AuditAction,
};
use custodian_core::traits::{AuditStore, ScanRange};
use custodian_verify::{RebuildRequest, REBUILD_CONFIRMATION};

use crate::mock_data::{asset_register, corrective_work_order};
use crate::scenarios::AuditRuntime;

#[derive(Debug)]
pub struct RebuildOutcome {
    pub unauthorized: CustodianError,
    pub unconfirmed: CustodianError,
    pub valid_before: bool,
    pub first: RebuildSummary,
    pub valid_after: bool,
    pub second: RebuildSummary,
    /// CHAIN_REBUILD records in the final chain, refusals included.
    pub rebuild_records: usize,
}

fn refused(result: CustodianResult<RebuildSummary>) -> CustodianResult<CustodianError> {
    match result {
        Err(e @ (CustodianError::Unauthorized { .. } | CustodianError::ConfirmationRequired)) => {
            Ok(e)
        }
        Err(other) => Err(other),
        Ok(_) => Err(CustodianError::ChainIntegrity {
            sequence_number: 0,
            reason: "rebuild ran without passing its gates".to_string(),
        }),
    }
}

pub async fn drive(runtime: &AuditRuntime<InMemoryAuditStore>) -> CustodianResult<RebuildOutcome> {
    let recorder = &runtime.recorder;
    runtime.act_as("u-201", "jkowalski", "10.20.4.18");
    for (n, asset) in asset_register().iter().enumerate() {
        let wo = corrective_work_order(&format!("WO-2405{}", n), asset, "Quarterly inspection");
        recorder.record_create(&wo, None);
        recorder.record_view(asset, None);
    }
    recorder.flush().await?;

    // Lose a record out of band so the rebuild has something to repair.
    runtime.store.remove(3).await;
    let valid_before = runtime.verifier.verify_chain(None, None).await?.is_valid;

    // ── A: wrong role ─────────────────────────────────────────────────────────
    runtime.act_as("u-014", "amensah", "10.20.1.5");
    let unauthorized = refused(
        runtime
            .verifier
            .rebuild_chain(RebuildRequest::new(
                "amensah",
                ["MaintenanceManager"],
                REBUILD_CONFIRMATION,
            ))
            .await,
    )?;

    // ── B: right role, no confirmation ────────────────────────────────────────
    runtime.act_as("u-001", "sysadmin", "10.20.0.2");
    let unconfirmed = refused(
        runtime
            .verifier
            .rebuild_chain(RebuildRequest::new("sysadmin", ["SystemAdministrator"], "yes"))
            .await,
    )?;

    // ── C and D: confirmed rebuilds ───────────────────────────────────────────
    let admin = RebuildRequest::new("sysadmin", ["SystemAdministrator"], REBUILD_CONFIRMATION);
    let first = runtime.verifier.rebuild_chain(admin.clone()).await?;
    let valid_after = runtime.verifier.verify_chain(None, None).await?.is_valid;
    recorder.flush().await?;
    let second = runtime.verifier.rebuild_chain(admin).await?;

    let rebuild_records = runtime
        .store
        .scan(ScanRange::all())
        .await?
        .iter()
        .filter(|r| r.entry.action == AuditAction::ChainRebuild)
        .count();

    Ok(RebuildOutcome {
        unauthorized,
        unconfirmed,
        valid_before,
        first,
        valid_after,
        second,
        rebuild_records,
    })
}

/// Run Scenario 3 and print each gate's outcome.
pub async fn run_scenario() -> CustodianResult<()> {
    println!("=== Scenario 3: Chain Rebuild ===");
    println!();

    let runtime = AuditRuntime::in_memory().await?;
    let outcome = drive(&runtime).await?;

    println!("  Record #3 deleted out of band; chain valid: {}", outcome.valid_before);
    println!();
    println!("  A. MaintenanceManager requests rebuild  → {}", outcome.unauthorized);
    println!("  B. SystemAdministrator, no confirmation → {}", outcome.unconfirmed);
    println!(
        "  C. Confirmed rebuild                    → {} rewritten, {} hash(es) changed, chain valid: {}",
        outcome.first.records_rewritten, outcome.first.hashes_changed, outcome.valid_after
    );
    println!(
        "  D. Rebuild of clean chain               → {} rewritten, {} hash(es) changed",
        outcome.second.records_rewritten, outcome.second.hashes_changed
    );
    println!();
    println!(
        "  {} CHAIN_REBUILD record(s) are in the log, refusals included.",
        outcome.rebuild_records
    );

    runtime.shutdown().await?;
    println!();
    println!("  Scenario 3 complete.");
    println!();
    Ok(())
}
