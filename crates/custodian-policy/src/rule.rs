//! Policy configuration schema.
//!
//! An `AuditPolicy` is deserialized from TOML.  Every table is optional; a
//! missing table or key falls back to the stock values below.
//!
//! Example:
//! ```toml
//! [writer]
//! flush_interval_ms = 5000
//! batch_size = 100
//!
//! [retention]
//! default_days = 2555
//! permanent_categories = ["SECURITY", "COMPLIANCE"]
//!
//! [[retention.rules]]
//! category = "DATA_ACCESS"
//! days = 365
//!
//! [access]
//! rebuild_roles = ["SystemAdministrator"]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use custodian_contracts::taxonomy::{AuditCategory, Severity};

// ── Writer tuning ─────────────────────────────────────────────────────────────

/// Timing and sizing of the batch writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// How often the writer wakes up when no entries arrive.
    pub flush_interval_ms: u64,

    /// Maximum number of entries stamped and appended together.
    pub batch_size: usize,

    /// Backoff between attempts to persist a failed batch.
    pub retry_delay_ms: u64,

    /// Attempts per batch during the final drain at shutdown.
    pub shutdown_flush_attempts: u32,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
            batch_size: 100,
            retry_delay_ms: 10_000,
            shutdown_flush_attempts: 3,
        }
    }
}

impl WriterSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ── Retention ─────────────────────────────────────────────────────────────────

/// Retention period for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub category: AuditCategory,
    pub days: u32,
}

/// How long records are kept.
///
/// Records in a `permanent_categories` category, or at or above
/// `permanent_min_severity`, are never expired.  Everything else expires
/// after the first matching rule's `days`, or `default_days`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub default_days: u32,
    pub permanent_categories: Vec<AuditCategory>,
    pub permanent_min_severity: Option<Severity>,
    pub rules: Vec<RetentionRule>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            // Seven years.
            default_days: 2_555,
            permanent_categories: vec![AuditCategory::Security, AuditCategory::Compliance],
            permanent_min_severity: Some(Severity::Critical),
            rules: vec![],
        }
    }
}

// ── Access ────────────────────────────────────────────────────────────────────

/// Roles allowed to use the administrative audit surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSettings {
    pub verify_roles: Vec<String>,

    /// Roles allowed to run the destructive chain rebuild.  Must not be empty.
    pub rebuild_roles: Vec<String>,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            verify_roles: vec!["Auditor".to_string(), "SystemAdministrator".to_string()],
            rebuild_roles: vec!["SystemAdministrator".to_string()],
        }
    }
}

/// The complete policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub writer: WriterSettings,
    pub retention: RetentionSettings,
    pub access: AccessSettings,
}
