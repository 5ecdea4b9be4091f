//! The loaded, validated audit policy.
//!
//! `AuditPolicy` wraps a `PolicyConfig` parsed from TOML and answers the three
//! questions the rest of the workspace asks of it:
//!
//! 1. How should the batch writer be tuned?  (`writer()`)
//! 2. When does a record expire?  (`apply_retention()`)
//! 3. May this actor verify or rebuild the chain?  (`can_verify()`, `can_rebuild()`)

use std::path::Path;

use chrono::Duration;
use tracing::debug;

use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    record::AuditEntry,
};

use crate::rule::{PolicyConfig, WriterSettings};

/// A validated audit policy.
///
/// ```rust,ignore
/// use custodian_policy::AuditPolicy;
///
/// let policy = AuditPolicy::from_file(Path::new("config/audit.toml"))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct AuditPolicy {
    config: PolicyConfig,
}

impl AuditPolicy {
    /// Validate `config` and wrap it.
    ///
    /// Returns `CustodianError::ConfigError` for settings that would stall or
    /// disable the writer, or that leave the rebuild path without any role.
    pub fn new(config: PolicyConfig) -> CustodianResult<Self> {
        let writer = &config.writer;
        if writer.batch_size == 0 {
            return Err(config_error("writer.batch_size must be greater than zero"));
        }
        if writer.flush_interval_ms == 0 {
            return Err(config_error("writer.flush_interval_ms must be greater than zero"));
        }
        if writer.shutdown_flush_attempts == 0 {
            return Err(config_error(
                "writer.shutdown_flush_attempts must be greater than zero",
            ));
        }
        if config.access.rebuild_roles.iter().all(|r| r.trim().is_empty()) {
            return Err(config_error("access.rebuild_roles must name at least one role"));
        }
        Ok(Self { config })
    }

    /// Parse `s` as TOML and build a validated policy.
    pub fn from_toml_str(s: &str) -> CustodianResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| CustodianError::ConfigError {
            reason: format!("failed to parse audit policy TOML: {}", e),
        })?;
        Self::new(config)
    }

    /// Read the file at `path` and parse it as an audit policy.
    pub fn from_file(path: &Path) -> CustodianResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CustodianError::ConfigError {
            reason: format!("failed to read audit policy '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn writer(&self) -> &WriterSettings {
        &self.config.writer
    }

    /// Set `permanent_retention` or `expiration_date` on `entry` from its
    /// category, severity, and `created_at`.
    pub fn apply_retention(&self, entry: &mut AuditEntry) {
        let retention = &self.config.retention;

        let permanent = retention.permanent_categories.contains(&entry.category)
            || retention
                .permanent_min_severity
                .is_some_and(|min| entry.severity >= min);

        if permanent {
            entry.permanent_retention = true;
            entry.expiration_date = None;
            return;
        }

        let days = retention
            .rules
            .iter()
            .find(|rule| rule.category == entry.category)
            .map_or(retention.default_days, |rule| rule.days);

        entry.permanent_retention = false;
        entry.expiration_date = Some(entry.created_at + Duration::days(i64::from(days)));
    }

    /// Whether any of `roles` may run a verification pass.
    pub fn can_verify<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        let allowed = has_any_role(&self.config.access.verify_roles, roles)
            || has_any_role(&self.config.access.rebuild_roles, roles);
        debug!(allowed, "verify access evaluated");
        allowed
    }

    /// Whether any of `roles` may run the destructive chain rebuild.
    pub fn can_rebuild<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        let allowed = has_any_role(&self.config.access.rebuild_roles, roles);
        debug!(allowed, "rebuild access evaluated");
        allowed
    }

    /// The roles that may rebuild, joined for error messages.
    pub fn rebuild_roles_display(&self) -> String {
        self.config.access.rebuild_roles.join(", ")
    }
}

fn has_any_role<S: AsRef<str>>(allowed: &[String], held: &[S]) -> bool {
    held.iter()
        .any(|h| allowed.iter().any(|a| a.eq_ignore_ascii_case(h.as_ref())))
}

fn config_error(reason: &str) -> CustodianError {
    CustodianError::ConfigError {
        reason: reason.to_string(),
    }
}
