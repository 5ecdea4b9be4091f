//! Verification results.
//!
//! `IntegrityReport` is what a verification pass hands back to the
//! administrative surface.  It is data only; the walk itself lives in
//! custodian-verify.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of damage a verification pass found on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    /// The recomputed content hash differs from the stored one: the record
    /// was edited in place.
    ContentMismatch,
    /// The stored `previous_hash` differs from the predecessor's stored
    /// content hash: a record was inserted, deleted, or reordered.
    ChainBreak,
    /// The sequence number is not its predecessor's plus one.
    SequenceGap,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            IssueType::ContentMismatch => "CONTENT_MISMATCH",
            IssueType::ChainBreak => "CHAIN_BREAK",
            IssueType::SequenceGap => "SEQUENCE_GAP",
        })
    }
}

/// One problem found on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub record_id: Option<u64>,
    pub sequence_number: u64,
    pub issue_type: IssueType,
    pub description: String,
}

/// The outcome of walking the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// `true` when `issues` is empty.
    pub is_valid: bool,
    pub total_checked: u64,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// Build a report, deriving `is_valid` from the issue list.
    pub fn new(total_checked: u64, issues: Vec<IntegrityIssue>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            total_checked,
            issues,
        }
    }

    /// Issues of one kind, in chain order.
    pub fn issues_of(&self, issue_type: IssueType) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues.iter().filter(move |i| i.issue_type == issue_type)
    }
}

/// What a rebuild rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub records_rewritten: u64,
    /// Records whose content hash differs from the value stored before the rebuild.
    pub hashes_changed: u64,
}
