//! Error types for the Custodian audit pipeline.
//!
//! All fallible operations return `CustodianResult<T>`.  None of these errors
//! ever reach a business caller through the recorder; they surface through the
//! writer's logs, the verification report, or the administrative surface.

use thiserror::Error;

/// The unified error type for the Custodian crates.
#[derive(Debug, Error)]
pub enum CustodianError {
    /// The store could not read or append records.  Transient: the writer
    /// retries the same batch until it succeeds.
    #[error("audit persistence failed: {reason}")]
    Persistence { reason: String },

    /// An entity snapshot or stored record could not be (de)serialized.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },

    /// A stored chain violates one of its integrity invariants.
    #[error("chain integrity violation at sequence {sequence_number}: {reason}")]
    ChainIntegrity { sequence_number: u64, reason: String },

    /// A required configuration value or startup precondition is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The writer has begun shutting down and no longer accepts entries.
    #[error("audit writer is closed")]
    WriterClosed,

    /// The actor lacks the role required for a privileged audit operation.
    #[error("'{actor}' is not authorized: {reason}")]
    Unauthorized { actor: String, reason: String },

    /// A destructive operation was requested without the explicit confirmation phrase.
    #[error("explicit confirmation is required for this operation")]
    ConfirmationRequired,
}

impl From<serde_json::Error> for CustodianError {
    fn from(err: serde_json::Error) -> Self {
        CustodianError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the Custodian crates.
pub type CustodianResult<T> = Result<T, CustodianError>;
