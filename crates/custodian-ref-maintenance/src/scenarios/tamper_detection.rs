//! Scenario 2: Tamper Detection
//!
//! Someone with direct database access edits a stored approval to change the
//! approver, and deletes the record of a failed sign-in.  Neither change goes
//! through the writer, so neither updates the chain.  Verification reports:
//!
//!   - CONTENT_MISMATCH on the edited record only (its successor still links
//!     to the stored hash, so the damage is not smeared down the chain)
//!   - CHAIN_BREAK and SEQUENCE_GAP on the record after the deleted one

use tracing::warn;

use custodian_audit::InMemoryAuditStore;
use custodian_contracts::{
    error::CustodianResult,
    integrity::{IntegrityReport, IssueType},
    taxonomy::AuditAction,
};
use custodian_core::traits::{AuditStore, ScanRange};

use crate::mock_data::{asset_register, corrective_work_order};
use crate::scenarios::AuditRuntime;

/// The two records that were interfered with, and what verification found.
#[derive(Debug)]
pub struct TamperOutcome {
    pub edited_sequence: u64,
    pub deleted_sequence: u64,
    pub report: IntegrityReport,
}

/// Record a short approval flow, then tamper with the stored chain.
pub async fn drive(runtime: &AuditRuntime<InMemoryAuditStore>) -> CustodianResult<TamperOutcome> {
    let recorder = &runtime.recorder;
    let asset = asset_register().remove(1);
    let work_order = corrective_work_order("WO-24033", &asset, "Fan vibration above alarm limit");

    runtime.act_as("u-201", "jkowalski", "10.20.4.18");
    recorder.record_create(&work_order, None);
    recorder.record_login_attempt("amensah", false, Some("password expired"));
    runtime.act_as("u-014", "amensah", "10.20.1.5");
    recorder.record_login_attempt("amensah", true, None);
    recorder.record_approval("WorkOrder", &work_order.id, true, Some("Overtime authorised"));
    recorder.record_view(&asset, None);
    recorder.record_logout("amensah");
    recorder.flush().await?;

    let records = runtime.store.scan(ScanRange::all()).await?;
    let find = |action: AuditAction| {
        records
            .iter()
            .find(|r| r.entry.action == action)
            .map(|r| r.sequence_number)
            .unwrap_or_default()
    };
    let edited_sequence = find(AuditAction::Approve);
    let deleted_sequence = find(AuditAction::LoginFailed);

    // ── Out-of-band interference ──────────────────────────────────────────────

    runtime
        .store
        .tamper(edited_sequence, |r| {
            r.entry.user_name = Some("jkowalski".to_string());
            r.entry.user_id = Some("u-201".to_string());
        })
        .await;
    runtime.store.remove(deleted_sequence).await;
    warn!(edited_sequence, deleted_sequence, "stored audit chain interfered with");

    let report = runtime.verifier.verify_chain(None, None).await?;
    Ok(TamperOutcome {
        edited_sequence,
        deleted_sequence,
        report,
    })
}

/// Run Scenario 2 and print the integrity report.
pub async fn run_scenario() -> CustodianResult<()> {
    println!("=== Scenario 2: Tamper Detection ===");
    println!();

    let runtime = AuditRuntime::in_memory().await?;
    let outcome = drive(&runtime).await?;

    println!(
        "  Edited approver on record #{} and deleted record #{} directly in storage.",
        outcome.edited_sequence, outcome.deleted_sequence
    );
    println!();
    println!(
        "  Integrity report: {} ({} record(s) checked, {} issue(s))",
        if outcome.report.is_valid { "VALID" } else { "INVALID" },
        outcome.report.total_checked,
        outcome.report.issues.len()
    );
    for issue in &outcome.report.issues {
        println!(
            "    #{:<3} {:<17} {}",
            issue.sequence_number, issue.issue_type, issue.description
        );
    }

    runtime.shutdown().await?;
    println!();
    println!("  Scenario 2 complete.");
    println!();
    Ok(())
}

/// Counts of each issue kind, for callers that only want the shape.
pub fn issue_counts(report: &IntegrityReport) -> (usize, usize, usize) {
    (
        report.issues_of(IssueType::ContentMismatch).count(),
        report.issues_of(IssueType::ChainBreak).count(),
        report.issues_of(IssueType::SequenceGap).count(),
    )
}
