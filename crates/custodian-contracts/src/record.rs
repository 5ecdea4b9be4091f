//! The audit record model.
//!
//! An `AuditEntry` is a *pending* event: built by the recorder at the moment
//! of the business action, not yet sequenced.  The batch writer turns it into
//! an `AuditRecord` by assigning its chain position and hashes; the store then
//! assigns `id`.  Persisted records are never edited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RequestContext;
use crate::taxonomy::{AuditAction, AuditCategory, Severity};

/// The `previous_hash` of the first record in every chain: 64 hex zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ── Pending entry ─────────────────────────────────────────────────────────────

/// The content of one audit event, before it joins the chain.
///
/// Every field here is covered by the record's content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    // Actor / request context.
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub http_method: Option<String>,
    pub request_url: Option<String>,

    // Subject.
    pub action: AuditAction,
    pub entity_name: Option<String>,
    pub entity_id: Option<String>,
    pub property_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    /// Structured extras such as the field-level change list of an update.
    pub additional_data: Option<Value>,
    pub description: Option<String>,
    pub category: AuditCategory,
    pub severity: Severity,

    // Outcome.
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,

    /// When the event was enqueued (UTC).  Not the sequencing time.
    pub created_at: DateTime<Utc>,

    // Retention.
    pub permanent_retention: bool,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// A successful, INFO-level entry for `action` in its default category.
    pub fn new(action: AuditAction) -> Self {
        Self {
            user_id: None,
            user_name: None,
            ip_address: None,
            user_agent: None,
            session_id: None,
            correlation_id: None,
            http_method: None,
            request_url: None,
            action,
            entity_name: None,
            entity_id: None,
            property_name: None,
            old_value: None,
            new_value: None,
            old_data: None,
            new_data: None,
            additional_data: None,
            description: None,
            category: action.default_category(),
            severity: Severity::Info,
            success: true,
            error_message: None,
            duration_ms: None,
            created_at: Utc::now(),
            permanent_retention: false,
            expiration_date: None,
        }
    }

    pub fn entity(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self.entity_id = Some(id.into());
        self
    }

    pub fn entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn category(mut self, category: AuditCategory) -> Self {
        self.category = category;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Record a single scalar change.
    pub fn property(
        mut self,
        name: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.property_name = Some(name.into());
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn snapshots(mut self, old_data: Option<Value>, new_data: Option<Value>) -> Self {
        self.old_data = old_data;
        self.new_data = new_data;
        self
    }

    pub fn additional_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }

    /// Mark the event as failed with `message`.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    pub fn duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Copy the actor and request fields from `ctx`.
    pub fn with_context(mut self, ctx: &RequestContext) -> Self {
        self.user_id = ctx.user_id.clone();
        self.user_name = ctx.user_name.clone();
        self.ip_address = ctx.ip_address.clone();
        self.user_agent = ctx.user_agent.clone();
        self.session_id = ctx.session_id.clone();
        self.correlation_id = ctx.correlation_id.clone();
        self.http_method = ctx.http_method.clone();
        self.request_url = ctx.request_url.clone();
        self
    }
}

// ── Persisted record ──────────────────────────────────────────────────────────

/// One entry of the hash chain.
///
/// `sequence_number`, `previous_hash`, and every field of `entry` are covered
/// by `content_hash`.  `id` is assigned by the store and `integrity_verified`
/// is set only by a verification pass; neither is hashed, so recording a
/// verification result never invalidates the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Storage-assigned identity.  `None` until the record is persisted.
    pub id: Option<u64>,

    /// Position in the chain, starting at 1.
    pub sequence_number: u64,

    #[serde(flatten)]
    pub entry: AuditEntry,

    /// Content hash of the preceding record, or `GENESIS_HASH` for the first.
    pub previous_hash: String,

    /// Lowercase hex SHA-256 of this record's canonical encoding.
    pub content_hash: String,

    #[serde(default)]
    pub integrity_verified: bool,
}

impl AuditRecord {
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }
}
