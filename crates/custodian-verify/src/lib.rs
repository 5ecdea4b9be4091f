//! # custodian-verify
//!
//! Integrity verification for the Custodian audit log.
//!
//! [`engine::ChainVerifier`] walks the stored chain and reports
//! `CONTENT_MISMATCH`, `CHAIN_BREAK` and `SEQUENCE_GAP` issues without ever
//! repairing them.  The only repair is [`ChainVerifier::rebuild_chain`], a
//! role-gated, confirmed, and itself audited trust reset.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use custodian_verify::{ChainVerifier, RebuildRequest, REBUILD_CONFIRMATION};
//!
//! let verifier = ChainVerifier::new(store, recorder, chain_lock);
//! verifier.preflight().await?;
//!
//! let report = verifier.verify_chain(None, None).await?;
//! if !report.is_valid {
//!     for issue in &report.issues {
//!         eprintln!("{} at {}: {}", issue.issue_type, issue.sequence_number, issue.description);
//!     }
//! }
//! ```

pub mod engine;
pub mod rebuild;

pub use engine::{check_records, ensure_valid, ChainVerifier};
pub use rebuild::{RebuildRequest, REBUILD_CONFIRMATION};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use custodian_audit::{
        new_chain_lock, BatchWriter, InMemoryAuditStore, JsonLinesAuditStore, Recorder,
    };
    use custodian_contracts::{
        context::RequestContext,
        error::{CustodianError, CustodianResult},
        integrity::IssueType,
        record::{AuditRecord, GENESIS_HASH},
        taxonomy::{AuditAction, Severity},
    };
    use custodian_core::{
        chain::compute_content_hash,
        traits::{AuditStore, FixedClock, ScanRange, StaticContextProvider},
    };
    use custodian_policy::{AuditPolicy, WriterSettings};

    use super::*;

    struct Harness<S> {
        verifier: ChainVerifier,
        recorder: Recorder,
        store: Arc<S>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    }

    impl<S> Harness<S> {
        async fn stop(self) {
            self.shutdown.cancel();
            self.task.await.unwrap();
        }
    }

    fn harness() -> Harness<InMemoryAuditStore> {
        harness_over(Arc::new(InMemoryAuditStore::new()), CancellationToken::new())
    }

    fn harness_over<S: AuditStore + 'static>(
        store: Arc<S>,
        shutdown: CancellationToken,
    ) -> Harness<S> {
        let lock = new_chain_lock();
        let settings = WriterSettings {
            flush_interval_ms: 20,
            retry_delay_ms: 10,
            ..WriterSettings::default()
        };
        let (handle, task) =
            BatchWriter::spawn(store.clone(), settings, shutdown.clone(), lock.clone());

        let clock = Arc::new(FixedClock::stepping(
            Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
            Duration::seconds(1),
        ));
        let context = Arc::new(StaticContextProvider::new(RequestContext {
            user_name: Some("planner".into()),
            ..RequestContext::default()
        }));
        let recorder = Recorder::new(handle, context, clock, AuditPolicy::default());
        let verifier = ChainVerifier::new(store.clone(), recorder.clone(), lock);

        Harness {
            verifier,
            recorder,
            store,
            shutdown,
            task,
        }
    }

    async fn seed<S>(h: &Harness<S>, n: usize) {
        for i in 0..n {
            let id = format!("WO-{}", i);
            h.recorder.record(
                AuditAction::Update,
                Some("WorkOrder"),
                Some(&id),
                None,
                None,
                Severity::Info,
            );
        }
        h.recorder.flush().await.unwrap();
    }

    fn admin_request() -> RebuildRequest {
        RebuildRequest::new("root", ["SystemAdministrator"], REBUILD_CONFIRMATION)
    }

    #[tokio::test]
    async fn create_update_delete_verifies_clean() {
        let h = harness();
        for action in [AuditAction::Create, AuditAction::Update, AuditAction::Delete] {
            h.recorder
                .record(action, Some("WorkOrder"), Some("WO-1"), None, None, Severity::Info);
        }
        h.recorder.flush().await.unwrap();

        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_checked, 3);
        assert!(report.issues.is_empty());

        // The pass's own INTEGRITY_CHECK record may already follow these.
        let records: Vec<AuditRecord> = h.store.records().await.into_iter().take(3).collect();
        let seqs: Vec<u64> = records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(records[0].previous_hash, GENESIS_HASH);
        assert!(records.iter().all(|r| r.integrity_verified));
        h.stop().await;
    }

    #[tokio::test]
    async fn verification_flag_does_not_disturb_hashes() {
        let h = harness();
        seed(&h, 4).await;

        h.verifier.verify_chain(None, None).await.unwrap();
        h.recorder.flush().await.unwrap();
        let second = h.verifier.verify_chain(None, None).await.unwrap();

        // Four seeded records plus the first pass's INTEGRITY_CHECK record.
        assert!(second.is_valid);
        assert_eq!(second.total_checked, 5);
        h.stop().await;
    }

    #[tokio::test]
    async fn tampered_record_is_one_content_mismatch() {
        let h = harness();
        seed(&h, 5).await;

        assert!(
            h.store
                .tamper(3, |r| r.entry.description = Some("nothing to see".into()))
                .await
        );

        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].issue_type, IssueType::ContentMismatch);
        assert_eq!(report.issues[0].sequence_number, 3);
        assert_eq!(report.issues_of(IssueType::ChainBreak).count(), 0);

        let flags: Vec<bool> = h
            .store
            .records()
            .await
            .iter()
            .take(5)
            .map(|r| r.integrity_verified)
            .collect();
        assert_eq!(flags, vec![true, true, false, true, true]);
        h.stop().await;
    }

    #[tokio::test]
    async fn deleted_record_breaks_the_next_link() {
        let h = harness();
        seed(&h, 5).await;
        h.store.remove(3).await.unwrap();

        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(!report.is_valid);
        let breaks: Vec<u64> = report
            .issues_of(IssueType::ChainBreak)
            .map(|i| i.sequence_number)
            .collect();
        assert_eq!(breaks, vec![4]);
        assert_eq!(report.issues_of(IssueType::SequenceGap).count(), 1);
        assert_eq!(report.issues_of(IssueType::ContentMismatch).count(), 0);
        assert!(matches!(
            ensure_valid(&report),
            Err(CustodianError::ChainIntegrity { sequence_number: 4, .. })
        ));
        h.stop().await;
    }

    #[tokio::test]
    async fn deleting_the_first_record_is_detected_on_full_scan() {
        let h = harness();
        seed(&h, 3).await;
        h.store.remove(1).await.unwrap();

        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert_eq!(report.issues_of(IssueType::ChainBreak).next().unwrap().sequence_number, 2);
        h.stop().await;
    }

    #[tokio::test]
    async fn windowed_scan_trusts_the_first_link() {
        let h = harness();
        seed(&h, 6).await;

        // Records 3..=5 were created at 09:00:02..09:00:04.
        let start = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 2).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 4).unwrap();
        let report = h.verifier.verify_chain(Some(start), Some(end)).await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);
        assert_eq!(report.total_checked, 3);

        // Record 3's link was trusted, not checked, so it is not flagged.
        let flags: Vec<bool> = h
            .store
            .records()
            .await
            .iter()
            .take(6)
            .map(|r| r.integrity_verified)
            .collect();
        assert_eq!(flags, vec![false, false, false, true, true, false]);
        h.stop().await;
    }

    #[tokio::test]
    async fn verification_is_recorded() {
        let h = harness();
        seed(&h, 2).await;
        h.verifier.verify_chain(None, None).await.unwrap();
        h.recorder.flush().await.unwrap();

        let last = h.store.last_record().await.unwrap().unwrap();
        assert_eq!(last.entry.action, AuditAction::IntegrityCheck);
        assert!(last.entry.success);
        h.stop().await;
    }

    #[tokio::test]
    async fn preflight_accepts_genesis_and_rejects_foreign_start() {
        let h = harness();
        seed(&h, 2).await;
        h.verifier.preflight().await.unwrap();

        h.store
            .tamper(1, |r| r.previous_hash = "ab".repeat(32))
            .await;
        assert!(matches!(
            h.verifier.preflight().await,
            Err(CustodianError::ConfigError { .. })
        ));
        h.stop().await;
    }

    // ── Rebuild ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rebuild_requires_role() {
        let h = harness();
        let request = RebuildRequest::new("tech", ["Technician"], REBUILD_CONFIRMATION);
        let err = h.verifier.rebuild_chain(request).await.unwrap_err();
        assert!(matches!(err, CustodianError::Unauthorized { .. }));

        // The refusal itself is on the record.
        h.recorder.flush().await.unwrap();
        let records = h.store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.action, AuditAction::ChainRebuild);
        assert!(!records[0].entry.success);
        h.stop().await;
    }

    #[tokio::test]
    async fn rebuild_requires_exact_confirmation() {
        let h = harness();
        let request = RebuildRequest::new("root", ["SystemAdministrator"], "rebuild audit chain");
        let err = h.verifier.rebuild_chain(request).await.unwrap_err();
        assert!(matches!(err, CustodianError::ConfirmationRequired));
        h.stop().await;
    }

    #[tokio::test]
    async fn rebuild_on_clean_chain_changes_no_hashes() {
        let h = harness();
        seed(&h, 5).await;
        let before: Vec<AuditRecord> = h.store.records().await;

        let summary = h.verifier.rebuild_chain(admin_request()).await.unwrap();
        // Five seeded records plus the CHAIN_REBUILD start record.
        assert_eq!(summary.records_rewritten, 6);
        assert_eq!(summary.hashes_changed, 0);

        let after = h.store.records().await;
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.content_hash, new.content_hash);
            assert_eq!(old.previous_hash, new.previous_hash);
        }

        // Start and completion records bracket the rewrite.
        let rebuilds: Vec<&AuditRecord> = after
            .iter()
            .filter(|r| r.entry.action == AuditAction::ChainRebuild)
            .collect();
        assert_eq!(rebuilds.len(), 2);
        assert!(rebuilds.iter().all(|r| r.entry.severity == Severity::Critical));
        h.stop().await;
    }

    #[tokio::test]
    async fn rebuild_after_deletion_yields_a_valid_chain() {
        let h = harness();
        seed(&h, 5).await;
        h.store.remove(2).await.unwrap();
        assert!(!h.verifier.verify_chain(None, None).await.unwrap().is_valid);

        let summary = h.verifier.rebuild_chain(admin_request()).await.unwrap();
        assert!(summary.hashes_changed > 0);

        let records = h.store.records().await;
        let seqs: Vec<u64> = records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seqs, (1..=records.len() as u64).collect::<Vec<_>>());

        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);
        h.stop().await;
    }

    #[tokio::test]
    async fn writer_continues_after_rebuild() {
        let h = harness();
        seed(&h, 3).await;
        h.store.remove(2).await.unwrap();
        h.verifier.rebuild_chain(admin_request()).await.unwrap();

        seed(&h, 2).await;
        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);
        h.stop().await;
    }

    // ── File-backed chain ─────────────────────────────────────────────────────

    async fn file_harness(dir: &tempfile::TempDir) -> Harness<JsonLinesAuditStore> {
        let store = JsonLinesAuditStore::open(dir.path().join("audit.jsonl"))
            .await
            .unwrap();
        harness_over(Arc::new(store), CancellationToken::new())
    }

    fn record_priced_order(recorder: &Recorder) {
        let unit_price = 0.07;
        let draft: f64 = 7.0 * unit_price;
        let revised: f64 = 9.0 * unit_price;
        recorder.record_mutation(
            AuditAction::Create,
            "PurchaseOrder",
            "PO-88120",
            None,
            Some(json!({ "quantity": 7, "total": draft })),
        );
        recorder.record_mutation(
            AuditAction::Update,
            "PurchaseOrder",
            "PO-88120",
            Some(json!({ "quantity": 7, "total": draft })),
            Some(json!({ "quantity": 9, "total": revised })),
        );
        recorder.record_mutation(
            AuditAction::Delete,
            "PurchaseOrder",
            "PO-88120",
            Some(json!({ "quantity": 9, "total": revised })),
            None,
        );
    }

    #[tokio::test]
    async fn create_update_delete_verifies_clean_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_harness(&dir).await;
        record_priced_order(&h.recorder);
        h.recorder.flush().await.unwrap();

        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);
        assert_eq!(report.total_checked, 3);

        let records = h.store.scan(ScanRange::all()).await.unwrap();
        for record in records.iter().take(3) {
            assert_eq!(compute_content_hash(record).unwrap(), record.content_hash);
            assert!(record.integrity_verified);
        }
        h.stop().await;
    }

    #[tokio::test]
    async fn rebuild_on_clean_file_chain_changes_no_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_harness(&dir).await;
        record_priced_order(&h.recorder);
        h.recorder.flush().await.unwrap();
        let before = h.store.scan(ScanRange::all()).await.unwrap();

        let summary = h.verifier.rebuild_chain(admin_request()).await.unwrap();
        assert_eq!(summary.records_rewritten, 4);
        assert_eq!(summary.hashes_changed, 0);

        let after = h.store.scan(ScanRange::all()).await.unwrap();
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.content_hash, new.content_hash);
        }
        let report = h.verifier.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);
        h.stop().await;
    }

    // ── Writer stopping mid-rebuild ───────────────────────────────────────────

    /// Stops the writer as soon as the rebuilt chain has been stored.
    struct StopAfterReplace {
        inner: InMemoryAuditStore,
        shutdown: CancellationToken,
        writer: Mutex<Option<JoinHandle<()>>>,
    }

    #[async_trait]
    impl AuditStore for StopAfterReplace {
        async fn append_batch(&self, records: &[AuditRecord]) -> CustodianResult<()> {
            self.inner.append_batch(records).await
        }

        async fn last_record(&self) -> CustodianResult<Option<AuditRecord>> {
            self.inner.last_record().await
        }

        async fn scan(&self, range: ScanRange) -> CustodianResult<Vec<AuditRecord>> {
            self.inner.scan(range).await
        }

        async fn mark_verified(&self, ids: &[u64]) -> CustodianResult<()> {
            self.inner.mark_verified(ids).await
        }

        async fn replace_chain(&self, records: Vec<AuditRecord>) -> CustodianResult<()> {
            self.inner.replace_chain(records).await?;
            self.shutdown.cancel();
            if let Some(task) = self.writer.lock().await.take() {
                task.await.unwrap();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn rebuild_summary_survives_writer_shutdown() {
        let shutdown = CancellationToken::new();
        let store = Arc::new(StopAfterReplace {
            inner: InMemoryAuditStore::new(),
            shutdown: shutdown.clone(),
            writer: Mutex::new(None),
        });
        let h = harness_over(store.clone(), shutdown);
        seed(&h, 3).await;

        let Harness {
            verifier,
            recorder,
            task,
            ..
        } = h;
        *store.writer.lock().await = Some(task);

        let summary = verifier.rebuild_chain(admin_request()).await.unwrap();
        assert_eq!(summary.records_rewritten, 4);
        assert_eq!(summary.hashes_changed, 0);
        assert!(recorder.writer().is_closed());

        // The completion record could not be written, the rewrite stands.
        assert_eq!(store.inner.len().await, 4);
    }
}
