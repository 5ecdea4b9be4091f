//! Scenario 1: Work Order Lifecycle
//!
//! A planner signs in, raises a corrective work order on a boiler feed pump,
//! schedules and assigns it, orders spare parts that a manager approves, the
//! technician completes the job, and the planner exports the month's orders.
//! Every step goes through the `Recorder`; nothing in the business flow waits
//! on the audit log.  At the end the chain is verified.

use tracing::info;

use custodian_contracts::{
    error::CustodianResult,
    integrity::IntegrityReport,
    record::AuditRecord,
    taxonomy::{AuditAction, AuditCategory, Severity},
};
use custodian_core::traits::{AuditStore, ScanRange};

use crate::mock_data::{
    asset_register, corrective_work_order, pressure_calibration, spare_parts_order, technicians,
    WorkOrder, WorkOrderStatus,
};
use crate::scenarios::AuditRuntime;

/// What the lifecycle run left behind.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub records: Vec<AuditRecord>,
    pub report: IntegrityReport,
}

/// Drive the lifecycle against `runtime` and verify the resulting chain.
pub async fn drive<S: AuditStore + 'static>(
    runtime: &AuditRuntime<S>,
) -> CustodianResult<LifecycleOutcome> {
    let recorder = &runtime.recorder;
    let pump = asset_register().remove(0);
    let tech = technicians().remove(0);

    // ── Planner raises and schedules the job ──────────────────────────────────

    runtime.act_as("u-201", "jkowalski", "10.20.4.18");
    recorder.record_login_attempt("jkowalski", true, None);
    recorder.record_view(&pump, Some("Opened asset from inspection round"));

    let opened = corrective_work_order("WO-24017", &pump, "Mechanical seal leaking at drive end");
    recorder.record_create(&opened, Some("Raised from inspection finding"));

    let scheduled = WorkOrder {
        status: WorkOrderStatus::Scheduled,
        priority: 1,
        assigned_to: Some(tech.id.clone()),
        ..opened.clone()
    };
    recorder.record_update(&opened, &scheduled, Some("Scheduled and assigned"));

    let po = spare_parts_order("PO-88120", &scheduled);
    recorder.record_create(&po, Some("Spare parts requested"));

    // ── Manager approves the spend ────────────────────────────────────────────

    runtime.act_as("u-014", "amensah", "10.20.1.5");
    recorder.record_approval("PurchaseOrder", &po.id, true, Some("Within planned budget"));

    // ── Technician completes the job ──────────────────────────────────────────

    runtime.act_as("u-377", "pnatarajan", "10.20.9.41");
    let completed = WorkOrder {
        status: WorkOrderStatus::Completed,
        estimated_cost: po.total + 420.0,
        completed_at: Some("2026-03-14T15:20:00Z".to_string()),
        ..scheduled.clone()
    };
    recorder.record_update(&scheduled, &completed, Some("Seal and bearings replaced"));
    recorder.record(
        AuditAction::Complete,
        Some("WorkOrder"),
        Some(&completed.id),
        Some("Work order signed off on site"),
        Some(AuditCategory::BusinessProcess),
        Severity::Info,
    );
    recorder.record_create(&pressure_calibration(), Some("Post-repair calibration"));

    // ── Planner reports and tidies up ─────────────────────────────────────────

    runtime.act_as("u-201", "jkowalski", "10.20.4.18");
    recorder.record_export("WorkOrder", 42, "csv");
    recorder.record_delete(&po, Some("Draft purchase order superseded"));
    recorder.record_logout("jkowalski");

    recorder.flush().await?;
    let report = runtime.verifier.verify_chain(None, None).await?;
    let records = runtime.store.scan(ScanRange::all()).await?;
    info!(records = records.len(), valid = report.is_valid, "work order lifecycle recorded");

    Ok(LifecycleOutcome { records, report })
}

/// Run Scenario 1 on an in-memory store and print the chain.
pub async fn run_scenario() -> CustodianResult<()> {
    println!("=== Scenario 1: Work Order Lifecycle ===");
    println!();

    let runtime = AuditRuntime::in_memory().await?;
    let outcome = drive(&runtime).await?;

    for record in &outcome.records {
        let entry = &record.entry;
        println!(
            "  #{:<3} {:<20} {:<16} {:<10} {:<8} {}",
            record.sequence_number,
            entry.action,
            entry.entity_name.as_deref().unwrap_or("-"),
            entry.entity_id.as_deref().unwrap_or("-"),
            entry.user_name.as_deref().unwrap_or("-"),
            record.content_hash.get(..12).unwrap_or(&record.content_hash),
        );
    }
    println!();
    println!(
        "  Audit chain integrity:  {} ({} record(s) checked)",
        if outcome.report.is_valid { "VERIFIED" } else { "FAILED" },
        outcome.report.total_checked
    );

    runtime.shutdown().await?;
    println!();
    println!("  Scenario 1 complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use custodian_contracts::GENESIS_HASH;

    use super::*;

    #[tokio::test]
    async fn lifecycle_produces_a_valid_attributed_chain() {
        let runtime = AuditRuntime::in_memory().await.unwrap();
        let outcome = drive(&runtime).await.unwrap();

        assert!(outcome.report.is_valid, "{:?}", outcome.report.issues);
        assert_eq!(outcome.report.total_checked, 12);
        assert_eq!(outcome.records[0].previous_hash, GENESIS_HASH);
        assert_eq!(outcome.records[0].entry.action, AuditAction::Login);

        let approval = outcome
            .records
            .iter()
            .find(|r| r.entry.action == AuditAction::Approve)
            .unwrap();
        assert_eq!(approval.entry.user_name.as_deref(), Some("amensah"));

        // The second update carries three field changes, so no single property.
        let completion = outcome
            .records
            .iter()
            .filter(|r| r.entry.action == AuditAction::Update)
            .nth(1)
            .unwrap();
        assert!(completion.entry.property_name.is_none());

        let calibration = outcome
            .records
            .iter()
            .find(|r| r.entry.entity_name.as_deref() == Some("CalibrationTable"))
            .unwrap();
        assert!(!calibration.entry.success);

        runtime.shutdown().await.unwrap();
    }
}
