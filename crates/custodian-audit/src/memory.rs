//! In-memory implementation of `AuditStore`.
//!
//! `InMemoryAuditStore` is the reference store.  It keeps every record in a
//! `Vec` behind a `tokio::sync::RwLock`, enforces the same contiguity rule a
//! database unique index would, and applies each batch atomically.
//!
//! It also exposes a few hooks that bypass the writer entirely (`tamper`,
//! `remove`, `fail_next_appends`) so tests and demo scenarios can simulate
//! an attacker with direct table access or a storage outage.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    record::AuditRecord,
};
use custodian_core::traits::{AuditStore, ScanRange};

// ── Contiguity check shared by the stores ─────────────────────────────────────

/// Reject a batch that does not continue the chain at `tail_sequence`.
///
/// This is the store-side half of the single-writer contract: even if two
/// writers raced, only one of them could ever append sequence `n`.
pub(crate) fn check_batch_follows(
    tail_sequence: Option<u64>,
    records: &[AuditRecord],
) -> CustodianResult<()> {
    let mut expected = tail_sequence.unwrap_or(0) + 1;
    for record in records {
        if record.sequence_number != expected {
            return Err(CustodianError::Persistence {
                reason: format!(
                    "sequence {} rejected: next sequence must be {}",
                    record.sequence_number, expected
                ),
            });
        }
        expected += 1;
    }
    Ok(())
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    /// Every persisted record, ordered by sequence number.
    records: Vec<AuditRecord>,

    /// Last record ever appended.  Kept separately so that removing a record
    /// through `remove()` leaves a hole instead of rewinding the tail, and
    /// `last_record` agrees with the contiguity check.
    tail: Option<AuditRecord>,

    next_id: u64,
}

// ── Public store ──────────────────────────────────────────────────────────────

/// An append-only audit store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    state: RwLock<MemoryState>,
    failing_appends: AtomicU32,
    append_calls: AtomicU64,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `append_batch` fail with a persistence error.
    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Total `append_batch` calls, successful or not.
    pub fn append_calls(&self) -> u64 {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// A copy of every record, in sequence order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Mutate the stored record at `sequence_number` in place, bypassing the
    /// writer and every hash.  Returns `false` if no such record exists.
    pub async fn tamper<F>(&self, sequence_number: u64, f: F) -> bool
    where
        F: FnOnce(&mut AuditRecord),
    {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        match state
            .records
            .iter_mut()
            .find(|r| r.sequence_number == sequence_number)
        {
            Some(record) => {
                warn!(sequence_number, "stored audit record modified out of band");
                f(record);
                let edited = record.clone();
                if state.tail.as_ref().map(|t| t.sequence_number) == Some(sequence_number) {
                    state.tail = Some(edited);
                }
                true
            }
            None => false,
        }
    }

    /// Delete the stored record at `sequence_number`, bypassing the writer.
    ///
    /// Deleting the tail does not rewind the chain: the next batch still
    /// continues from the deleted record, so the deletion shows up as a
    /// broken link on its successor.
    pub async fn remove(&self, sequence_number: u64) -> Option<AuditRecord> {
        let mut state = self.state.write().await;
        let idx = state
            .records
            .iter()
            .position(|r| r.sequence_number == sequence_number)?;
        warn!(sequence_number, "stored audit record deleted out of band");
        Some(state.records.remove(idx))
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append_batch(&self, records: &[AuditRecord]) -> CustodianResult<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CustodianError::Persistence {
                reason: "audit store unavailable".to_string(),
            });
        }

        let mut state = self.state.write().await;
        check_batch_follows(state.tail.as_ref().map(|t| t.sequence_number), records)?;

        for record in records {
            state.next_id += 1;
            let mut stored = record.clone();
            stored.id = Some(state.next_id);
            state.tail = Some(stored.clone());
            state.records.push(stored);
        }
        Ok(())
    }

    async fn last_record(&self) -> CustodianResult<Option<AuditRecord>> {
        Ok(self.state.read().await.tail.clone())
    }

    async fn scan(&self, range: ScanRange) -> CustodianResult<Vec<AuditRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| range.contains(&r.entry.created_at))
            .cloned()
            .collect())
    }

    async fn mark_verified(&self, ids: &[u64]) -> CustodianResult<()> {
        let mut state = self.state.write().await;
        for record in state.records.iter_mut() {
            if record.id.is_some_and(|id| ids.contains(&id)) {
                record.integrity_verified = true;
            }
        }
        Ok(())
    }

    async fn replace_chain(&self, mut records: Vec<AuditRecord>) -> CustodianResult<()> {
        records.sort_by_key(|r| r.sequence_number);
        check_batch_follows(None, &records)?;

        let mut state = self.state.write().await;
        for record in records.iter_mut() {
            if record.id.is_none() {
                state.next_id += 1;
                record.id = Some(state.next_id);
            }
        }
        state.tail = records.last().cloned();
        state.records = records;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use custodian_contracts::{record::AuditEntry, taxonomy::AuditAction};
    use custodian_core::chain::{stamp_all, ChainTail};

    use super::*;

    fn chain_of(n: usize) -> Vec<AuditRecord> {
        let entries = (0..n)
            .map(|i| AuditEntry::new(AuditAction::View).entity("Asset", format!("A-{}", i)))
            .collect();
        stamp_all(None, entries).unwrap().0
    }

    #[tokio::test]
    async fn append_assigns_ids_and_keeps_order() {
        let store = InMemoryAuditStore::new();
        store.append_batch(&chain_of(3)).await.unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![Some(1), Some(2), Some(3)]
        );
        assert_eq!(store.last_record().await.unwrap().unwrap().sequence_number, 3);
    }

    #[tokio::test]
    async fn non_contiguous_batch_is_rejected_atomically() {
        let store = InMemoryAuditStore::new();
        let mut records = chain_of(3);
        records.remove(1);

        let err = store.append_batch(&records).await.unwrap_err();
        assert!(matches!(err, CustodianError::Persistence { .. }));
        assert!(store.is_empty().await, "no part of a rejected batch may land");
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected() {
        let store = InMemoryAuditStore::new();
        let records = chain_of(2);
        store.append_batch(&records).await.unwrap();
        assert!(store.append_batch(&records[1..]).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryAuditStore::new();
        store.fail_next_appends(2);
        let records = chain_of(1);

        assert!(store.append_batch(&records).await.is_err());
        assert!(store.append_batch(&records).await.is_err());
        assert!(store.append_batch(&records).await.is_ok());
        assert_eq!(store.append_calls(), 3);
    }

    #[tokio::test]
    async fn removal_leaves_a_hole_at_the_tail_position() {
        let store = InMemoryAuditStore::new();
        let records = chain_of(3);
        store.append_batch(&records).await.unwrap();
        store.remove(3).await.unwrap();

        // The tail sequence does not rewind, so 3 cannot be re-appended.
        assert!(store.append_batch(&records[2..]).await.is_err());
    }

    #[tokio::test]
    async fn removed_tail_is_still_the_chain_tail() {
        let store = InMemoryAuditStore::new();
        let records = chain_of(3);
        store.append_batch(&records).await.unwrap();
        store.remove(3).await.unwrap();

        let tail = store.last_record().await.unwrap().unwrap();
        assert_eq!(tail.sequence_number, 3);
        assert_eq!(tail.content_hash, records[2].content_hash);

        // A batch stamped against the reported tail is accepted.
        let next = AuditEntry::new(AuditAction::View).entity("Asset", "A-9");
        let (after, _) = stamp_all(Some(ChainTail::of(&tail)), vec![next]).unwrap();
        store.append_batch(&after).await.unwrap();
        assert_eq!(store.len().await, 3);
        assert_eq!(store.last_record().await.unwrap().unwrap().sequence_number, 4);
    }

    #[tokio::test]
    async fn mark_verified_only_touches_listed_ids() {
        let store = InMemoryAuditStore::new();
        store.append_batch(&chain_of(3)).await.unwrap();
        store.mark_verified(&[2]).await.unwrap();

        let flags: Vec<bool> = store
            .records()
            .await
            .iter()
            .map(|r| r.integrity_verified)
            .collect();
        assert_eq!(flags, vec![false, true, false]);
    }
}
