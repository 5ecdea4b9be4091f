//! # custodian-core
//!
//! The seams and the pure sequencing logic of the Custodian audit log.
//!
//! This crate provides:
//! - The collaborator traits (`AuditStore`, `ContextProvider`, `Clock`)
//! - The `chain` module: canonical encoding, `stamp`, and hash recomputation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use custodian_core::{chain::{stamp, ChainTail}, traits::AuditStore};
//!
//! let tail = store.last_record().await?.as_ref().map(ChainTail::of);
//! let record = stamp(tail.as_ref(), entry)?;
//! store.append_batch(&[record]).await?;
//! ```

pub mod chain;
pub mod traits;

pub use chain::{compute_content_hash, stamp, ChainTail};
pub use traits::{AuditStore, Clock, ContextProvider, ScanRange, SystemClock};
