//! The recorder facade: the only audit API business code sees.
//!
//! Every `record_*` call builds an `AuditEntry`, fills in the ambient request
//! context, the clock time and retention, and hands it to the batch writer.
//! Calls never block and never fail: a rejected enqueue is logged and the
//! business operation carries on.

use std::error::Error;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use custodian_contracts::{
    context::RequestContext,
    error::CustodianResult,
    record::AuditEntry,
    taxonomy::{AuditAction, AuditCategory, Severity},
};
use custodian_core::traits::{Clock, ContextProvider, SystemClock};
use custodian_policy::AuditPolicy;

use crate::diff::{changes_payload, field_changes, DEFAULT_EXCLUDED};
use crate::writer::WriterHandle;

/// A business entity that can be the subject of an audit record.
pub trait AuditSubject {
    /// Type name as it should appear in the log, e.g. `"WorkOrder"`.
    fn entity_name(&self) -> &str;
    fn entity_id(&self) -> String;
}

struct RecorderInner {
    writer: WriterHandle,
    context: Arc<dyn ContextProvider>,
    clock: Arc<dyn Clock>,
    policy: AuditPolicy,
}

/// Publishes audit events.  Cheap to clone; share one per process.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new(
        writer: WriterHandle,
        context: Arc<dyn ContextProvider>,
        clock: Arc<dyn Clock>,
        policy: AuditPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                writer,
                context,
                clock,
                policy,
            }),
        }
    }

    /// A recorder for background work: system actor, wall-clock time.
    pub fn system(writer: WriterHandle, policy: AuditPolicy) -> Self {
        let context: Arc<dyn ContextProvider> = Arc::new(RequestContext::system);
        Self::new(writer, context, Arc::new(SystemClock), policy)
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.inner.writer
    }

    pub fn policy(&self) -> &AuditPolicy {
        &self.inner.policy
    }

    /// Wait until everything recorded so far is persisted.
    pub async fn flush(&self) -> CustodianResult<()> {
        self.inner.writer.flush().await
    }

    // ── Core ──────────────────────────────────────────────────────────────────

    /// Stamp `entry` with context, time and retention, then enqueue it.
    ///
    /// Context fields already set on `entry` are kept.
    pub fn record_entry(&self, mut entry: AuditEntry) {
        let ctx = self.inner.context.current();
        fill_context(&mut entry, ctx);
        entry.created_at = self.inner.clock.now();
        self.inner.policy.apply_retention(&mut entry);

        let action = entry.action;
        if let Err(e) = self.inner.writer.enqueue(entry) {
            error!(
                error = %e,
                %action,
                "audit entry dropped: writer is not accepting entries"
            );
        }
    }

    /// Record a plain event.  `category` defaults to the action's own.
    pub fn record(
        &self,
        action: AuditAction,
        entity_name: Option<&str>,
        entity_id: Option<&str>,
        description: Option<&str>,
        category: Option<AuditCategory>,
        severity: Severity,
    ) {
        let mut entry = AuditEntry::new(action)
            .category(category.unwrap_or_else(|| action.default_category()))
            .severity(severity);
        entry.entity_name = entity_name.map(str::to_string);
        entry.entity_id = entity_id.map(str::to_string);
        entry.description = description.map(str::to_string);
        self.record_entry(entry);
    }

    // ── Entity lifecycle ──────────────────────────────────────────────────────

    pub fn record_create<T>(&self, entity: &T, description: Option<&str>)
    where
        T: AuditSubject + Serialize,
    {
        let entry = match serde_json::to_value(entity) {
            Ok(snapshot) => subject_entry(AuditAction::Create, entity, description)
                .snapshots(None, Some(snapshot)),
            Err(e) => snapshot_fallback(AuditAction::Create, entity, &e),
        };
        self.record_entry(entry);
    }

    /// Record an update with both snapshots and the field-level change list.
    pub fn record_update<T>(&self, old: &T, new: &T, description: Option<&str>)
    where
        T: AuditSubject + Serialize,
    {
        let entry = match (serde_json::to_value(old), serde_json::to_value(new)) {
            (Ok(old_data), Ok(new_data)) => with_changes(
                subject_entry(AuditAction::Update, new, description),
                old_data,
                new_data,
            ),
            (Err(e), _) | (_, Err(e)) => snapshot_fallback(AuditAction::Update, new, &e),
        };
        self.record_entry(entry);
    }

    pub fn record_delete<T>(&self, entity: &T, description: Option<&str>)
    where
        T: AuditSubject + Serialize,
    {
        let entry = match serde_json::to_value(entity) {
            Ok(snapshot) => subject_entry(AuditAction::Delete, entity, description)
                .snapshots(Some(snapshot), None),
            Err(e) => snapshot_fallback(AuditAction::Delete, entity, &e),
        };
        self.record_entry(entry);
    }

    pub fn record_view<T>(&self, entity: &T, description: Option<&str>)
    where
        T: AuditSubject,
    {
        self.record_entry(subject_entry(AuditAction::View, entity, description));
    }

    /// Untyped variant of the lifecycle calls for callers that only hold
    /// JSON snapshots.  A change list is attached when both snapshots exist.
    pub fn record_mutation(
        &self,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        old_snapshot: Option<Value>,
        new_snapshot: Option<Value>,
    ) {
        let entry = AuditEntry::new(action).entity(entity_type, entity_id);
        let entry = match (old_snapshot, new_snapshot) {
            (Some(old), Some(new)) => with_changes(entry, old, new),
            (old, new) => entry.snapshots(old, new),
        };
        self.record_entry(entry);
    }

    // ── Authentication ────────────────────────────────────────────────────────

    pub fn record_login_attempt(&self, username: &str, success: bool, error: Option<&str>) {
        let mut entry = if success {
            AuditEntry::new(AuditAction::Login)
                .description(format!("User '{}' signed in", username))
        } else {
            AuditEntry::new(AuditAction::LoginFailed)
                .severity(Severity::Warning)
                .description(format!("Failed sign-in for '{}'", username))
                .failed(error.unwrap_or("authentication failed"))
        };
        entry.user_name = Some(username.to_string());
        self.record_entry(entry.category(AuditCategory::Authentication));
    }

    pub fn record_logout(&self, username: &str) {
        let mut entry = AuditEntry::new(AuditAction::Logout)
            .category(AuditCategory::Authentication)
            .description(format!("User '{}' signed out", username));
        entry.user_name = Some(username.to_string());
        self.record_entry(entry);
    }

    // ── Bulk data ─────────────────────────────────────────────────────────────

    pub fn record_export(&self, entity_name: &str, record_count: usize, format: &str) {
        let entry = AuditEntry::new(AuditAction::Export)
            .entity_name(entity_name)
            .category(AuditCategory::Reporting)
            .description(format!(
                "Exported {} {} records as {}",
                record_count, entity_name, format
            ))
            .additional_data(json!({ "record_count": record_count, "format": format }));
        self.record_entry(entry);
    }

    pub fn record_import(
        &self,
        entity_name: &str,
        record_count: usize,
        success: bool,
        error: Option<&str>,
    ) {
        let mut entry = AuditEntry::new(AuditAction::Import)
            .entity_name(entity_name)
            .category(AuditCategory::DataModification)
            .description(format!("Imported {} {} records", record_count, entity_name))
            .additional_data(json!({ "record_count": record_count }));
        if !success {
            entry = entry
                .severity(Severity::Error)
                .failed(error.unwrap_or("import failed"));
        }
        self.record_entry(entry);
    }

    // ── System ────────────────────────────────────────────────────────────────

    /// Record an error with its whole `source()` chain.
    pub fn record_error(&self, err: &dyn Error, context: Option<&str>) {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        let description = match context {
            Some(ctx) => format!("Error in {}", ctx),
            None => "Unhandled error".to_string(),
        };
        let entry = AuditEntry::new(AuditAction::SystemError)
            .severity(Severity::Error)
            .description(description)
            .failed(message);
        self.record_entry(entry);
    }

    pub fn record_configuration_change(
        &self,
        setting: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) {
        let entry = AuditEntry::new(AuditAction::ConfigurationChange)
            .category(AuditCategory::Configuration)
            .severity(Severity::Warning)
            .description(format!("Setting '{}' changed", setting))
            .property(
                setting,
                old_value.map(str::to_string),
                new_value.map(str::to_string),
            );
        self.record_entry(entry);
    }

    pub fn record_approval(
        &self,
        entity_name: &str,
        entity_id: &str,
        approved: bool,
        comments: Option<&str>,
    ) {
        let (action, verb) = if approved {
            (AuditAction::Approve, "approved")
        } else {
            (AuditAction::Reject, "rejected")
        };
        let description = match comments {
            Some(c) => format!("{} {} {}: {}", entity_name, entity_id, verb, c),
            None => format!("{} {} {}", entity_name, entity_id, verb),
        };
        let entry = AuditEntry::new(action)
            .entity(entity_name, entity_id)
            .category(AuditCategory::BusinessProcess)
            .description(description);
        self.record_entry(entry);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn fill_context(entry: &mut AuditEntry, ctx: RequestContext) {
    fn fill(slot: &mut Option<String>, value: Option<String>) {
        if slot.is_none() {
            *slot = value;
        }
    }
    fill(&mut entry.user_id, ctx.user_id);
    fill(&mut entry.user_name, ctx.user_name);
    fill(&mut entry.ip_address, ctx.ip_address);
    fill(&mut entry.user_agent, ctx.user_agent);
    fill(&mut entry.session_id, ctx.session_id);
    fill(&mut entry.correlation_id, ctx.correlation_id);
    fill(&mut entry.http_method, ctx.http_method);
    fill(&mut entry.request_url, ctx.request_url);
}

fn subject_entry<T: AuditSubject + ?Sized>(
    action: AuditAction,
    entity: &T,
    description: Option<&str>,
) -> AuditEntry {
    let mut entry = AuditEntry::new(action).entity(entity.entity_name(), entity.entity_id());
    entry.description = description.map(str::to_string);
    entry
}

/// Attach both snapshots and the change list.  A single changed field is
/// also surfaced as `property_name`/`old_value`/`new_value`.
fn with_changes(entry: AuditEntry, old_data: Value, new_data: Value) -> AuditEntry {
    let changes = field_changes(&old_data, &new_data, DEFAULT_EXCLUDED);
    let mut entry = entry
        .snapshots(Some(old_data), Some(new_data))
        .additional_data(changes_payload(&changes));
    if let [only] = changes.as_slice() {
        entry = entry.property(only.field.clone(), only.from_text(), only.to_text());
    }
    entry
}

fn snapshot_fallback<T: AuditSubject + ?Sized>(
    action: AuditAction,
    entity: &T,
    err: &serde_json::Error,
) -> AuditEntry {
    warn!(
        error = %err,
        %action,
        entity = entity.entity_name(),
        "entity snapshot failed to serialize, recording fallback entry"
    );
    AuditEntry::new(action)
        .entity(entity.entity_name(), entity.entity_id())
        .severity(Severity::Warning)
        .description(format!(
            "{} {} recorded without snapshot: serialization failed",
            entity.entity_name(),
            entity.entity_id()
        ))
        .failed(err.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fmt;

    use chrono::{TimeZone, Utc};
    use serde::ser::{Error as _, Serializer};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use custodian_contracts::record::AuditRecord;
    use custodian_core::traits::{FixedClock, StaticContextProvider};
    use custodian_policy::WriterSettings;

    use super::*;
    use crate::memory::InMemoryAuditStore;
    use crate::writer::{new_chain_lock, BatchWriter};

    #[derive(Serialize, Clone)]
    struct Asset {
        id: String,
        name: String,
        status: String,
        hours: u32,
    }

    impl AuditSubject for Asset {
        fn entity_name(&self) -> &str {
            "Asset"
        }
        fn entity_id(&self) -> String {
            self.id.clone()
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("snapshot source is poisoned"))
        }
    }

    impl AuditSubject for Unserializable {
        fn entity_name(&self) -> &str {
            "Sensor"
        }
        fn entity_id(&self) -> String {
            "S-1".to_string()
        }
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "work order sync failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    struct Harness {
        recorder: Recorder,
        store: Arc<InMemoryAuditStore>,
        context: Arc<StaticContextProvider>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    }

    impl Harness {
        async fn records(&self) -> Vec<AuditRecord> {
            self.recorder.flush().await.unwrap();
            self.store.records().await
        }

        async fn stop(self) {
            self.shutdown.cancel();
            self.task.await.unwrap();
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryAuditStore::new());
        let shutdown = CancellationToken::new();
        let settings = WriterSettings {
            flush_interval_ms: 20,
            retry_delay_ms: 10,
            ..WriterSettings::default()
        };
        let (handle, task) =
            BatchWriter::spawn(store.clone(), settings, shutdown.clone(), new_chain_lock());

        let context = Arc::new(StaticContextProvider::new(RequestContext {
            user_id: Some("u-42".into()),
            user_name: Some("dana".into()),
            ip_address: Some("10.0.0.7".into()),
            ..RequestContext::default()
        }));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        ));
        let recorder = Recorder::new(handle, context.clone(), clock, AuditPolicy::default());

        Harness {
            recorder,
            store,
            context,
            shutdown,
            task,
        }
    }

    fn pump() -> Asset {
        Asset {
            id: "A-100".into(),
            name: "Feed pump".into(),
            status: "Operational".into(),
            hours: 1200,
        }
    }

    #[tokio::test]
    async fn create_carries_context_clock_and_snapshot() {
        let h = harness();
        h.recorder.record_create(&pump(), Some("registered"));

        let records = h.records().await;
        assert_eq!(records.len(), 1);
        let entry = &records[0].entry;
        assert_eq!(entry.action, AuditAction::Create);
        assert_eq!(entry.entity_name.as_deref(), Some("Asset"));
        assert_eq!(entry.entity_id.as_deref(), Some("A-100"));
        assert_eq!(entry.user_name.as_deref(), Some("dana"));
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(entry.created_at, Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
        assert_eq!(entry.new_data.as_ref().unwrap()["name"], "Feed pump");
        assert!(entry.old_data.is_none());
        assert!(entry.expiration_date.is_some(), "retention is applied");
        h.stop().await;
    }

    #[tokio::test]
    async fn update_with_one_change_fills_property_fields() {
        let h = harness();
        let before = pump();
        let after = Asset {
            status: "UnderMaintenance".into(),
            ..before.clone()
        };
        h.recorder.record_update(&before, &after, None);

        let records = h.records().await;
        let entry = &records[0].entry;
        assert_eq!(entry.property_name.as_deref(), Some("status"));
        assert_eq!(entry.old_value.as_deref(), Some("Operational"));
        assert_eq!(entry.new_value.as_deref(), Some("UnderMaintenance"));
        let changes = &entry.additional_data.as_ref().unwrap()["changes"];
        assert_eq!(changes.as_array().unwrap().len(), 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn update_with_many_changes_lists_them_all() {
        let h = harness();
        let before = pump();
        let after = Asset {
            status: "Retired".into(),
            hours: 1500,
            ..before.clone()
        };
        h.recorder.record_update(&before, &after, Some("decommissioned"));

        let records = h.records().await;
        let entry = &records[0].entry;
        assert!(entry.property_name.is_none());
        let changes = entry.additional_data.as_ref().unwrap()["changes"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["field"], "hours");
        assert_eq!(changes[1]["field"], "status");
        h.stop().await;
    }

    #[tokio::test]
    async fn explicit_user_survives_context_fill() {
        let h = harness();
        h.recorder.record_login_attempt("mallory", false, Some("bad password"));

        let records = h.records().await;
        let entry = &records[0].entry;
        assert_eq!(entry.action, AuditAction::LoginFailed);
        assert_eq!(entry.category, AuditCategory::Authentication);
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.user_name.as_deref(), Some("mallory"));
        assert_eq!(entry.user_id.as_deref(), Some("u-42"));
        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("bad password"));
        h.stop().await;
    }

    #[tokio::test]
    async fn context_is_read_at_record_time() {
        let h = harness();
        h.recorder.record_logout("dana");
        h.context.set(RequestContext {
            user_name: Some("erin".into()),
            ..RequestContext::default()
        });
        h.recorder.record_view(&pump(), None);

        let records = h.records().await;
        assert_eq!(records[1].entry.user_name.as_deref(), Some("erin"));
        assert!(records[1].entry.ip_address.is_none());
        h.stop().await;
    }

    #[tokio::test]
    async fn serialization_failure_records_fallback() {
        let h = harness();
        h.recorder.record_create(&Unserializable, None);

        let records = h.records().await;
        assert_eq!(records.len(), 1);
        let entry = &records[0].entry;
        assert_eq!(entry.action, AuditAction::Create);
        assert_eq!(entry.entity_id.as_deref(), Some("S-1"));
        assert!(!entry.success);
        assert!(entry.severity >= Severity::Warning);
        assert!(entry
            .error_message
            .as_deref()
            .unwrap()
            .contains("snapshot source is poisoned"));
        h.stop().await;
    }

    #[tokio::test]
    async fn error_message_includes_source_chain() {
        let h = harness();
        let err = Outer(std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out"));
        h.recorder.record_error(&err, Some("nightly sync"));

        let records = h.records().await;
        let entry = &records[0].entry;
        assert_eq!(entry.action, AuditAction::SystemError);
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(
            entry.error_message.as_deref(),
            Some("work order sync failed: upstream timed out")
        );
        h.stop().await;
    }

    #[tokio::test]
    async fn approval_and_configuration_use_their_categories() {
        let h = harness();
        h.recorder.record_approval("PurchaseOrder", "PO-9", false, Some("over budget"));
        h.recorder.record_configuration_change("writer.batch_size", Some("100"), Some("50"));
        h.recorder.record_export("Asset", 12, "csv");
        h.recorder.record_import("Asset", 3, false, None);

        let records = h.records().await;
        assert_eq!(records[0].entry.action, AuditAction::Reject);
        assert_eq!(records[0].entry.category, AuditCategory::BusinessProcess);
        assert_eq!(records[1].entry.category, AuditCategory::Configuration);
        assert_eq!(records[1].entry.new_value.as_deref(), Some("50"));
        assert_eq!(records[2].entry.category, AuditCategory::Reporting);
        assert_eq!(records[3].entry.category, AuditCategory::DataModification);
        assert!(!records[3].entry.success);
        h.stop().await;
    }

    #[tokio::test]
    async fn mutation_without_old_snapshot_has_no_changes() {
        let h = harness();
        h.recorder.record_mutation(
            AuditAction::Create,
            "Technician",
            "T-3",
            None,
            Some(json!({ "name": "Sam" })),
        );

        let records = h.records().await;
        assert!(records[0].entry.additional_data.is_none());
        assert_eq!(records[0].entry.new_data.as_ref().unwrap()["name"], "Sam");
        h.stop().await;
    }

    #[tokio::test]
    async fn recording_after_shutdown_does_not_panic() {
        let h = harness();
        let recorder = h.recorder.clone();
        h.stop().await;

        recorder.record(AuditAction::View, Some("Asset"), None, None, None, Severity::Info);
        assert!(recorder.writer().is_closed());
    }
}
