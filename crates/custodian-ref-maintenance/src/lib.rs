//! # custodian-ref-maintenance
//!
//! Maintenance-management reference runtime for the Custodian audit log.
//!
//! Demonstrates four scenarios using mock data:
//!
//! 1. **Work Order Lifecycle**: every Recorder operation along one repair job,
//!    ending in a clean verification.
//! 2. **Tamper Detection**: an edited and a deleted record, reported as
//!    CONTENT_MISMATCH and CHAIN_BREAK.
//! 3. **Chain Rebuild**: the role and confirmation gates, and an idempotent
//!    rebuild.
//! 4. **Concurrent Load**: 20 producers × 50 events into one contiguous chain.
//!
//! All data is hardcoded and fictional.

pub mod mock_data;
pub mod scenarios;
