//! Hash-chain verification for the Custodian audit log.
//!
//! `ChainVerifier::verify_chain` walks the stored records in sequence order
//! and runs three checks on each one:
//!
//! 1. **Content**: the hash recomputed from the stored fields must equal the
//!    stored `content_hash`.  A mismatch means the record was edited in place.
//! 2. **Linkage**: the stored `previous_hash` must equal the predecessor's
//!    *stored* `content_hash`.  A mismatch means a record was inserted,
//!    deleted, or reordered.  Using the stored value keeps a single edited
//!    record from cascading into breaks for everything after it.
//! 3. **Sequence**: each sequence number must be its predecessor's plus one.
//!
//! Every problem is collected before returning so operators see the whole
//! damage in one report.  Verification never repairs anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use custodian_audit::{ChainLock, Recorder};
use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    integrity::{IntegrityIssue, IntegrityReport, IssueType},
    record::{AuditEntry, AuditRecord, GENESIS_HASH},
    taxonomy::{AuditAction, Severity},
};
use custodian_core::{
    chain::compute_content_hash,
    traits::{AuditStore, ScanRange},
};

/// Verifies and, when explicitly authorized, rebuilds the audit chain.
pub struct ChainVerifier {
    pub(crate) store: Arc<dyn AuditStore>,
    pub(crate) recorder: Recorder,
    pub(crate) chain_lock: ChainLock,
}

impl ChainVerifier {
    /// `chain_lock` must be the lock the batch writer was built with.
    pub fn new(store: Arc<dyn AuditStore>, recorder: Recorder, chain_lock: ChainLock) -> Self {
        Self {
            store,
            recorder,
            chain_lock,
        }
    }

    /// Startup checks that make every later verification meaningful.
    ///
    /// Fails with `ConfigError` when the store cannot guarantee unique
    /// sequence numbers, or when the first record does not start from the
    /// genesis hash.
    pub async fn preflight(&self) -> CustodianResult<()> {
        if !self.store.has_unique_sequence_index() {
            return Err(CustodianError::ConfigError {
                reason: "audit store does not enforce unique sequence numbers".to_string(),
            });
        }

        let records = self.store.scan(ScanRange::all()).await?;
        if let Some(first) = records.iter().find(|r| r.sequence_number == 1) {
            if first.previous_hash != GENESIS_HASH {
                return Err(CustodianError::ConfigError {
                    reason: format!(
                        "first audit record links to '{}' instead of the genesis hash",
                        first.previous_hash
                    ),
                });
            }
        }

        info!(records = records.len(), "audit chain preflight passed");
        Ok(())
    }

    /// Fail with `Unauthorized` unless one of `roles` may verify the chain.
    pub fn authorize_verify<S: AsRef<str>>(&self, actor: &str, roles: &[S]) -> CustodianResult<()> {
        if self.recorder.policy().can_verify(roles) {
            Ok(())
        } else {
            Err(CustodianError::Unauthorized {
                actor: actor.to_string(),
                reason: "verifying the audit chain requires an auditor role".to_string(),
            })
        }
    }

    /// Walk the chain, optionally restricted to records created within
    /// `[start, end]`, and report every issue found.
    ///
    /// Records that pass every check are flagged `integrity_verified`.  The
    /// pass itself is recorded as an `INTEGRITY_CHECK` event.
    pub async fn verify_chain(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CustodianResult<IntegrityReport> {
        let range = ScanRange::between(start, end);
        let mut records = self.store.scan(range).await?;
        records.sort_by_key(|r| r.sequence_number);

        let (issues, verified_ids) = check_records(&records, range.is_full());
        let report = IntegrityReport::new(records.len() as u64, issues);

        if !verified_ids.is_empty() {
            if let Err(e) = self.store.mark_verified(&verified_ids).await {
                warn!(error = %e, "failed to flag verified audit records");
            }
        }

        if report.is_valid {
            info!(total_checked = report.total_checked, "audit chain verified");
        } else {
            for issue in &report.issues {
                warn!(
                    sequence_number = issue.sequence_number,
                    issue_type = %issue.issue_type,
                    description = %issue.description,
                    "audit chain integrity issue"
                );
            }
        }

        self.record_check(&report, &range);
        Ok(report)
    }

    fn record_check(&self, report: &IntegrityReport, range: &ScanRange) {
        let scope = if range.is_full() { "full chain" } else { "date range" };
        let mut entry = AuditEntry::new(AuditAction::IntegrityCheck).additional_data(
            serde_json::json!({
                "total_checked": report.total_checked,
                "issues": report.issues.len(),
                "start": range.start,
                "end": range.end,
            }),
        );
        entry = if report.is_valid {
            entry.description(format!(
                "Integrity check of {} passed ({} records)",
                scope, report.total_checked
            ))
        } else {
            entry
                .severity(Severity::Critical)
                .description(format!(
                    "Integrity check of {} found {} issue(s)",
                    scope,
                    report.issues.len()
                ))
                .failed(summarize(report))
        };
        self.recorder.record_entry(entry);
    }
}

/// Turn an invalid report into a `ChainIntegrity` error naming the first issue.
pub fn ensure_valid(report: &IntegrityReport) -> CustodianResult<()> {
    match report.issues.first() {
        None => Ok(()),
        Some(first) => Err(CustodianError::ChainIntegrity {
            sequence_number: first.sequence_number,
            reason: summarize(report),
        }),
    }
}

fn summarize(report: &IntegrityReport) -> String {
    let count = |t| report.issues_of(t).count();
    format!(
        "{} content mismatch(es), {} chain break(s), {} sequence gap(s)",
        count(IssueType::ContentMismatch),
        count(IssueType::ChainBreak),
        count(IssueType::SequenceGap)
    )
}

/// Check `records` (sorted by sequence) and return the issues found plus the
/// ids of records that passed every check.
///
/// A full scan is anchored at the genesis hash and sequence 1.  A windowed
/// scan whose first record is not sequence 1 trusts that record's own link,
/// since its predecessor lies outside the window.  That record is never
/// reported as verified.
pub fn check_records(records: &[AuditRecord], full_scan: bool) -> (Vec<IntegrityIssue>, Vec<u64>) {
    let mut issues = Vec::new();
    let mut verified = Vec::new();

    let mut expected_previous: Option<&str> = None;
    let mut previous_sequence: Option<u64> = match records.first() {
        Some(first) if !full_scan && first.sequence_number != 1 => None,
        _ => Some(0),
    };

    for record in records {
        let seq = record.sequence_number;
        let before = issues.len();
        let issue = |issue_type, description: String| IntegrityIssue {
            record_id: record.id,
            sequence_number: seq,
            issue_type,
            description,
        };

        match compute_content_hash(record) {
            Ok(hash) if hash == record.content_hash => {}
            Ok(hash) => issues.push(issue(
                IssueType::ContentMismatch,
                format!(
                    "stored content hash {} does not match recomputed {}",
                    short(&record.content_hash),
                    short(&hash)
                ),
            )),
            Err(e) => issues.push(issue(
                IssueType::ContentMismatch,
                format!("record could not be re-encoded: {}", e),
            )),
        }

        let link_trusted = expected_previous.is_none() && !full_scan && seq != 1;
        let expected = match expected_previous {
            Some(hash) => hash,
            None if !link_trusted => GENESIS_HASH,
            None => record.previous_hash.as_str(),
        };
        if record.previous_hash != expected {
            issues.push(issue(
                IssueType::ChainBreak,
                format!(
                    "previous hash {} does not match expected {}",
                    short(&record.previous_hash),
                    short(expected)
                ),
            ));
        }

        if let Some(prev) = previous_sequence {
            if seq != prev + 1 {
                issues.push(issue(
                    IssueType::SequenceGap,
                    format!("sequence {} follows {}, expected {}", seq, prev, prev + 1),
                ));
            }
        }

        if issues.len() == before && !link_trusted {
            if let Some(id) = record.id {
                verified.push(id);
            }
        }
        expected_previous = Some(record.content_hash.as_str());
        previous_sequence = Some(seq);
    }

    (issues, verified)
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
