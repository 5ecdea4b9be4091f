//! Hash-chain primitives: canonical encoding, stamping, and hash recomputation.
//!
//! The writer and the verifier must hash exactly the same bytes, forever.  The
//! encoding is therefore defined once, here, and every field that contributes
//! to a record's hash is listed explicitly so nothing is accidentally omitted.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence_number as 8-byte little-endian
//!   2. previous_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. compact JSON of `CanonicalContent` (field order fixed by the struct)
//!
//! `id`, `content_hash`, and `integrity_verified` are never part of the input.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use custodian_contracts::{
    error::CustodianResult,
    record::{AuditEntry, AuditRecord, GENESIS_HASH},
    taxonomy::{AuditAction, AuditCategory, Severity},
};

// ── Canonical encoding ────────────────────────────────────────────────────────

/// Borrowed, explicitly ordered view of every hashed content field.
///
/// Reordering, renaming, or removing a field here breaks verification of
/// every record already persisted.  New fields may only be appended, and only
/// together with a migration that rebuilds the chain.
#[derive(Serialize)]
struct CanonicalContent<'a> {
    user_id: Option<&'a str>,
    user_name: Option<&'a str>,
    ip_address: Option<&'a str>,
    user_agent: Option<&'a str>,
    session_id: Option<&'a str>,
    correlation_id: Option<&'a str>,
    http_method: Option<&'a str>,
    request_url: Option<&'a str>,
    action: AuditAction,
    entity_name: Option<&'a str>,
    entity_id: Option<&'a str>,
    property_name: Option<&'a str>,
    old_value: Option<&'a str>,
    new_value: Option<&'a str>,
    old_data: Option<&'a Value>,
    new_data: Option<&'a Value>,
    additional_data: Option<&'a Value>,
    description: Option<&'a str>,
    category: AuditCategory,
    severity: Severity,
    success: bool,
    error_message: Option<&'a str>,
    duration_ms: Option<u64>,
    created_at: String,
    permanent_retention: bool,
    expiration_date: Option<String>,
}

/// RFC 3339, nanosecond precision, `Z` suffix: one spelling per instant.
fn canonical_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl<'a> CanonicalContent<'a> {
    fn of(entry: &'a AuditEntry) -> Self {
        Self {
            user_id: entry.user_id.as_deref(),
            user_name: entry.user_name.as_deref(),
            ip_address: entry.ip_address.as_deref(),
            user_agent: entry.user_agent.as_deref(),
            session_id: entry.session_id.as_deref(),
            correlation_id: entry.correlation_id.as_deref(),
            http_method: entry.http_method.as_deref(),
            request_url: entry.request_url.as_deref(),
            action: entry.action,
            entity_name: entry.entity_name.as_deref(),
            entity_id: entry.entity_id.as_deref(),
            property_name: entry.property_name.as_deref(),
            old_value: entry.old_value.as_deref(),
            new_value: entry.new_value.as_deref(),
            old_data: entry.old_data.as_ref(),
            new_data: entry.new_data.as_ref(),
            additional_data: entry.additional_data.as_ref(),
            description: entry.description.as_deref(),
            category: entry.category,
            severity: entry.severity,
            success: entry.success,
            error_message: entry.error_message.as_deref(),
            duration_ms: entry.duration_ms,
            created_at: canonical_timestamp(&entry.created_at),
            permanent_retention: entry.permanent_retention,
            expiration_date: entry.expiration_date.as_ref().map(canonical_timestamp),
        }
    }
}

/// The exact bytes hashed for a record at `sequence_number` linked to
/// `previous_hash`.
///
/// Snapshot objects are emitted with sorted keys (serde_json's default map),
/// so two structurally equal snapshots always encode identically.
pub fn canonical_bytes(
    sequence_number: u64,
    previous_hash: &str,
    entry: &AuditEntry,
) -> CustodianResult<Vec<u8>> {
    let content = serde_json::to_vec(&CanonicalContent::of(entry))?;

    let mut bytes = Vec::with_capacity(8 + previous_hash.len() + content.len());
    bytes.extend_from_slice(&sequence_number.to_le_bytes());
    bytes.extend_from_slice(previous_hash.as_bytes());
    bytes.extend_from_slice(&content);
    Ok(bytes)
}

/// SHA-256 of the canonical encoding, as a lowercase 64-character hex string.
pub fn hash_content(
    sequence_number: u64,
    previous_hash: &str,
    entry: &AuditEntry,
) -> CustodianResult<String> {
    let bytes = canonical_bytes(sequence_number, previous_hash, entry)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Recompute a stored record's content hash from its stored fields.
pub fn compute_content_hash(record: &AuditRecord) -> CustodianResult<String> {
    hash_content(record.sequence_number, &record.previous_hash, &record.entry)
}

// ── Stamping ─────────────────────────────────────────────────────────────────

/// The two facts about the last persisted record that the next stamp needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    pub sequence_number: u64,
    pub content_hash: String,
}

impl ChainTail {
    pub fn of(record: &AuditRecord) -> Self {
        Self {
            sequence_number: record.sequence_number,
            content_hash: record.content_hash.clone(),
        }
    }
}

/// Assign `entry` its chain position after `prior` and compute its hash.
///
/// Must only ever be called by the single owner of the chain tail, strictly
/// sequentially.  Two calls with the same stale `prior` produce duplicate
/// sequence numbers.
pub fn stamp(prior: Option<&ChainTail>, entry: AuditEntry) -> CustodianResult<AuditRecord> {
    let (sequence_number, previous_hash) = match prior {
        Some(tail) => (tail.sequence_number + 1, tail.content_hash.clone()),
        None => (1, GENESIS_HASH.to_string()),
    };

    let content_hash = hash_content(sequence_number, &previous_hash, &entry)?;

    Ok(AuditRecord {
        id: None,
        sequence_number,
        entry,
        previous_hash,
        content_hash,
        integrity_verified: false,
    })
}

/// Stamp `entries` as one contiguous run after `prior`, advancing the tail in
/// memory after each record.  Returns the stamped records and the new tail.
pub fn stamp_all(
    prior: Option<ChainTail>,
    entries: Vec<AuditEntry>,
) -> CustodianResult<(Vec<AuditRecord>, Option<ChainTail>)> {
    let mut tail = prior;
    let mut stamped = Vec::with_capacity(entries.len());
    for entry in entries {
        let record = stamp(tail.as_ref(), entry)?;
        tail = Some(ChainTail::of(&record));
        stamped.push(record);
    }
    Ok((stamped, tail))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
