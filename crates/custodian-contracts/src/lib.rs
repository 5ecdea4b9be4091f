//! # custodian-contracts
//!
//! Shared record model, enumerations, and error types for the Custodian
//! tamper-evident audit log.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod context;
pub mod error;
pub mod integrity;
pub mod record;
pub mod taxonomy;

pub use context::RequestContext;
pub use error::{CustodianError, CustodianResult};
pub use integrity::{IntegrityIssue, IntegrityReport, IssueType, RebuildSummary};
pub use record::{AuditEntry, AuditRecord, GENESIS_HASH};
pub use taxonomy::{AuditAction, AuditCategory, Severity};
