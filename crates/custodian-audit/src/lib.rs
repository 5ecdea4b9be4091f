//! # custodian-audit
//!
//! The write side of the Custodian audit log.
//!
//! - [`Recorder`]: the facade business code calls (`record_create`,
//!   `record_update`, `record_login_attempt`, ...).  Never blocks, never fails.
//! - [`BatchWriter`]: the single consumer that assigns sequence numbers,
//!   chains hashes, and persists in batches.
//! - Stores: [`InMemoryAuditStore`] and the file-backed
//!   [`JsonLinesAuditStore`].
//!
//! ## Wiring
//!
//! ```rust,ignore
//! let store: Arc<dyn AuditStore> = Arc::new(JsonLinesAuditStore::open("audit.jsonl").await?);
//! let shutdown = CancellationToken::new();
//! let lock = new_chain_lock();
//! let (handle, task) = BatchWriter::spawn(store, policy.writer().clone(), shutdown.clone(), lock);
//! let recorder = Recorder::system(handle, policy);
//!
//! recorder.record_create(&work_order, Some("opened from inspection"));
//!
//! shutdown.cancel();
//! task.await?;
//! ```

pub mod diff;
pub mod file;
pub mod memory;
pub mod recorder;
pub mod writer;

pub use diff::{field_changes, FieldChange};
pub use file::JsonLinesAuditStore;
pub use memory::InMemoryAuditStore;
pub use recorder::{AuditSubject, Recorder};
pub use writer::{new_chain_lock, BatchWriter, ChainLock, WriterHandle, WriterStats};
