//! Collaborator seams for the audit pipeline.
//!
//! - `AuditStore`      — append-only persistence of stamped records
//! - `ContextProvider` — ambient actor and request metadata
//! - `Clock`           — UTC timestamps for `created_at`
//!
//! The recorder, writer, and verifier depend only on these traits, so the
//! surrounding application can plug in its own database, request pipeline,
//! and time source.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use custodian_contracts::{
    context::RequestContext, error::CustodianResult, record::AuditRecord,
};

// ── Storage ───────────────────────────────────────────────────────────────────

/// An optional `created_at` window for scans.  Both bounds are inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ScanRange {
    /// Every record in the store.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *at >= s) && self.end.map_or(true, |e| *at <= e)
    }
}

/// Append-only storage for the audit chain.
///
/// Implementations must enforce a unique, monotonically increasing
/// `sequence_number`: a batch whose first record is not the current tail
/// plus one, or whose sequence numbers are not contiguous, is rejected with
/// `CustodianError::Persistence`.  Each batch is applied atomically so a
/// concurrent reader never observes half of it.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a stamped, contiguous batch.  The store assigns `id`.
    async fn append_batch(&self, records: &[AuditRecord]) -> CustodianResult<()>;

    /// The record with the highest sequence number, if any.
    async fn last_record(&self) -> CustodianResult<Option<AuditRecord>>;

    /// Records whose `created_at` falls in `range`, ordered by sequence number.
    async fn scan(&self, range: ScanRange) -> CustodianResult<Vec<AuditRecord>>;

    /// Set the hash-excluded `integrity_verified` flag on the given ids.
    async fn mark_verified(&self, ids: &[u64]) -> CustodianResult<()>;

    /// Overwrite the entire chain with `records`.
    ///
    /// Only the privileged rebuild path calls this.  It is the single
    /// exception to append-only behaviour.
    async fn replace_chain(&self, records: Vec<AuditRecord>) -> CustodianResult<()>;

    /// Whether the backing table enforces uniqueness of `sequence_number`.
    /// Checked once at startup.
    fn has_unique_sequence_index(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: AuditStore + ?Sized> AuditStore for Arc<S> {
    async fn append_batch(&self, records: &[AuditRecord]) -> CustodianResult<()> {
        (**self).append_batch(records).await
    }

    async fn last_record(&self) -> CustodianResult<Option<AuditRecord>> {
        (**self).last_record().await
    }

    async fn scan(&self, range: ScanRange) -> CustodianResult<Vec<AuditRecord>> {
        (**self).scan(range).await
    }

    async fn mark_verified(&self, ids: &[u64]) -> CustodianResult<()> {
        (**self).mark_verified(ids).await
    }

    async fn replace_chain(&self, records: Vec<AuditRecord>) -> CustodianResult<()> {
        (**self).replace_chain(records).await
    }

    fn has_unique_sequence_index(&self) -> bool {
        (**self).has_unique_sequence_index()
    }
}

// ── Request context ───────────────────────────────────────────────────────────

/// Supplies the actor and request metadata for the event being recorded.
///
/// Called synchronously on the producer's thread at record time, so it must
/// not block.
pub trait ContextProvider: Send + Sync {
    fn current(&self) -> RequestContext;
}

impl<F> ContextProvider for F
where
    F: Fn() -> RequestContext + Send + Sync,
{
    fn current(&self) -> RequestContext {
        self()
    }
}

/// A provider whose context can be swapped, e.g. per scenario step.
#[derive(Debug, Default)]
pub struct StaticContextProvider {
    ctx: Mutex<RequestContext>,
}

impl StaticContextProvider {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx: Mutex::new(ctx) }
    }

    pub fn set(&self, ctx: RequestContext) {
        *self.ctx.lock().unwrap_or_else(|e| e.into_inner()) = ctx;
    }
}

impl ContextProvider for StaticContextProvider {
    fn current(&self) -> RequestContext {
        self.ctx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Source of UTC timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.  Each `now()` advances it by `step`
/// so consecutive records get distinct, ordered timestamps.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
    step: chrono::Duration,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::stepping(start, chrono::Duration::zero())
    }

    pub fn stepping(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            current: Mutex::new(start),
            step,
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let now = *current;
        *current = now + self.step;
        now
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn scan_range_bounds_are_inclusive() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let range = ScanRange::between(Some(start), Some(end));

        assert!(range.contains(&start));
        assert!(range.contains(&end));
        assert!(!range.contains(&(end + chrono::Duration::seconds(1))));
        assert!(!range.is_full());
        assert!(ScanRange::all().is_full());
    }

    #[test]
    fn stepping_clock_advances_per_call() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let clock = FixedClock::stepping(start, chrono::Duration::milliseconds(10));
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(10));
    }

    #[test]
    fn closures_are_context_providers() {
        let provider = || RequestContext {
            user_name: Some("dana".to_string()),
            ..RequestContext::default()
        };
        assert_eq!(provider.current().user_name.as_deref(), Some("dana"));
    }
}
