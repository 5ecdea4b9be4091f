//! Closed enumerations that classify every audit record.
//!
//! Each enum is the single source of truth for its value set.  UI layers list
//! the choices through the `ALL` constants instead of discovering them at
//! runtime.  On the wire every value is SCREAMING_SNAKE_CASE, which is also
//! the form that enters the content hash.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CustodianError;

// ── AuditAction ──────────────────────────────────────────────────────────────

/// What happened to the subject of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    View,
    Update,
    Delete,
    Login,
    LoginFailed,
    Logout,
    Export,
    Import,
    Approve,
    Reject,
    Schedule,
    Assign,
    Complete,
    Cancel,
    ConfigurationChange,
    PermissionChange,
    IntegrityCheck,
    ChainRebuild,
    SystemError,
}

impl AuditAction {
    pub const ALL: [AuditAction; 20] = [
        AuditAction::Create,
        AuditAction::View,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Login,
        AuditAction::LoginFailed,
        AuditAction::Logout,
        AuditAction::Export,
        AuditAction::Import,
        AuditAction::Approve,
        AuditAction::Reject,
        AuditAction::Schedule,
        AuditAction::Assign,
        AuditAction::Complete,
        AuditAction::Cancel,
        AuditAction::ConfigurationChange,
        AuditAction::PermissionChange,
        AuditAction::IntegrityCheck,
        AuditAction::ChainRebuild,
        AuditAction::SystemError,
    ];

    /// The wire name, e.g. `"LOGIN_FAILED"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::View => "VIEW",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::Logout => "LOGOUT",
            AuditAction::Export => "EXPORT",
            AuditAction::Import => "IMPORT",
            AuditAction::Approve => "APPROVE",
            AuditAction::Reject => "REJECT",
            AuditAction::Schedule => "SCHEDULE",
            AuditAction::Assign => "ASSIGN",
            AuditAction::Complete => "COMPLETE",
            AuditAction::Cancel => "CANCEL",
            AuditAction::ConfigurationChange => "CONFIGURATION_CHANGE",
            AuditAction::PermissionChange => "PERMISSION_CHANGE",
            AuditAction::IntegrityCheck => "INTEGRITY_CHECK",
            AuditAction::ChainRebuild => "CHAIN_REBUILD",
            AuditAction::SystemError => "SYSTEM_ERROR",
        }
    }

    /// The category a record with this action falls into when the caller
    /// does not name one explicitly.
    pub fn default_category(&self) -> AuditCategory {
        match self {
            AuditAction::View | AuditAction::Export => AuditCategory::DataAccess,
            AuditAction::Create
            | AuditAction::Update
            | AuditAction::Delete
            | AuditAction::Import => AuditCategory::DataModification,
            AuditAction::Login | AuditAction::LoginFailed | AuditAction::Logout => {
                AuditCategory::Authentication
            }
            AuditAction::PermissionChange => AuditCategory::Authorization,
            AuditAction::Approve
            | AuditAction::Reject
            | AuditAction::Schedule
            | AuditAction::Assign
            | AuditAction::Complete
            | AuditAction::Cancel => AuditCategory::BusinessProcess,
            AuditAction::ConfigurationChange => AuditCategory::Configuration,
            AuditAction::IntegrityCheck | AuditAction::ChainRebuild => AuditCategory::Compliance,
            AuditAction::SystemError => AuditCategory::SystemAdministration,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CustodianError::ConfigError {
                reason: format!("unknown audit action '{}'", s),
            })
    }
}

// ── AuditCategory ────────────────────────────────────────────────────────────

/// The compliance bucket a record belongs to.  Retention rules key on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    DataAccess,
    DataModification,
    Authentication,
    Authorization,
    BusinessProcess,
    SystemAdministration,
    Reporting,
    Configuration,
    Security,
    Compliance,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 10] = [
        AuditCategory::DataAccess,
        AuditCategory::DataModification,
        AuditCategory::Authentication,
        AuditCategory::Authorization,
        AuditCategory::BusinessProcess,
        AuditCategory::SystemAdministration,
        AuditCategory::Reporting,
        AuditCategory::Configuration,
        AuditCategory::Security,
        AuditCategory::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::DataAccess => "DATA_ACCESS",
            AuditCategory::DataModification => "DATA_MODIFICATION",
            AuditCategory::Authentication => "AUTHENTICATION",
            AuditCategory::Authorization => "AUTHORIZATION",
            AuditCategory::BusinessProcess => "BUSINESS_PROCESS",
            AuditCategory::SystemAdministration => "SYSTEM_ADMINISTRATION",
            AuditCategory::Reporting => "REPORTING",
            AuditCategory::Configuration => "CONFIGURATION",
            AuditCategory::Security => "SECURITY",
            AuditCategory::Compliance => "COMPLIANCE",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CustodianError::ConfigError {
                reason: format!("unknown audit category '{}'", s),
            })
    }
}

// ── Severity ─────────────────────────────────────────────────────────────────

/// How loudly a record should be surfaced.  Variants are declared in
/// ascending order so `Ord` can be used for thresholds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
