//! # custodian-policy
//!
//! TOML-driven writer tuning, retention, and access policy for the Custodian
//! audit log.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use custodian_policy::AuditPolicy;
//!
//! let policy = AuditPolicy::from_file(Path::new("config/audit.toml"))?;
//! let (writer, handle) = BatchWriter::new(store, policy.writer().clone(), shutdown, lock);
//! ```
//!
//! Every key is optional; `AuditPolicy::default()` carries the stock values.

pub mod engine;
pub mod rule;

pub use engine::AuditPolicy;
pub use rule::{AccessSettings, PolicyConfig, RetentionRule, RetentionSettings, WriterSettings};

// ── Tests ─────────────────────────────────────────────────────────────────────
