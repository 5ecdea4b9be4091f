//! The privileged chain rebuild.
//!
//! Rebuilding reorders every stored record by `(created_at, id)`, reassigns
//! sequence numbers from 1 and recomputes every hash from genesis.  The
//! result is a self-consistent chain over whatever data exists *now*: any
//! evidence of earlier tampering is erased.  It is therefore gated on a
//! rebuild role plus an exact confirmation phrase, and it is bracketed by
//! CRITICAL `CHAIN_REBUILD` records on both sides.

use tracing::{error, info, warn};

use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    integrity::RebuildSummary,
    record::{AuditEntry, AuditRecord},
    taxonomy::{AuditAction, AuditCategory, Severity},
};
use custodian_core::{
    chain::{stamp, ChainTail},
    traits::ScanRange,
};

use crate::engine::ChainVerifier;

/// The phrase an operator must type to confirm a rebuild.
pub const REBUILD_CONFIRMATION: &str = "REBUILD AUDIT CHAIN";

/// Who is asking for a rebuild, and whether they confirmed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRequest {
    pub actor: String,
    pub roles: Vec<String>,
    /// Must equal `REBUILD_CONFIRMATION` exactly.
    pub confirmation: String,
}

impl RebuildRequest {
    pub fn new(
        actor: impl Into<String>,
        roles: impl IntoIterator<Item = impl Into<String>>,
        confirmation: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            confirmation: confirmation.into(),
        }
    }
}

fn rebuild_entry(actor: &str) -> AuditEntry {
    let mut entry = AuditEntry::new(AuditAction::ChainRebuild)
        .category(AuditCategory::Security)
        .severity(Severity::Critical);
    entry.user_name = Some(actor.to_string());
    entry
}

impl ChainVerifier {
    /// Recompute the whole chain from genesis.
    ///
    /// Fails with `Unauthorized` when none of the request's roles may
    /// rebuild, and with `ConfirmationRequired` when the confirmation phrase
    /// does not match.  Both refusals are themselves audited.
    pub async fn rebuild_chain(&self, request: RebuildRequest) -> CustodianResult<RebuildSummary> {
        let policy = self.recorder.policy();
        if !policy.can_rebuild(&request.roles) {
            warn!(actor = %request.actor, roles = ?request.roles, "chain rebuild refused");
            self.recorder.record_entry(
                rebuild_entry(&request.actor)
                    .severity(Severity::Warning)
                    .description("Chain rebuild refused: missing role")
                    .failed("unauthorized"),
            );
            return Err(CustodianError::Unauthorized {
                actor: request.actor,
                reason: format!(
                    "rebuilding the audit chain requires one of: {}",
                    policy.rebuild_roles_display()
                ),
            });
        }

        if request.confirmation != REBUILD_CONFIRMATION {
            warn!(actor = %request.actor, "chain rebuild not confirmed");
            self.recorder.record_entry(
                rebuild_entry(&request.actor)
                    .severity(Severity::Warning)
                    .description("Chain rebuild refused: confirmation phrase did not match")
                    .failed("confirmation required"),
            );
            return Err(CustodianError::ConfirmationRequired);
        }

        // The start record must be in the chain before the rewrite begins.
        self.recorder.record_entry(
            rebuild_entry(&request.actor)
                .description("Chain rebuild started: all sequence numbers and hashes will be recomputed"),
        );
        self.recorder.flush().await?;

        let summary = {
            let _guard = self.chain_lock.lock().await;
            self.rewrite_chain().await
        };

        match &summary {
            Ok(summary) => {
                info!(
                    actor = %request.actor,
                    records_rewritten = summary.records_rewritten,
                    hashes_changed = summary.hashes_changed,
                    "audit chain rebuilt"
                );
                self.recorder.record_entry(
                    rebuild_entry(&request.actor)
                        .description(format!(
                            "Chain rebuild completed: {} records rewritten, {} hashes changed",
                            summary.records_rewritten, summary.hashes_changed
                        ))
                        .additional_data(serde_json::json!({
                            "records_rewritten": summary.records_rewritten,
                            "hashes_changed": summary.hashes_changed,
                        })),
                );
            }
            Err(e) => {
                error!(actor = %request.actor, error = %e, "audit chain rebuild failed");
                self.recorder.record_entry(
                    rebuild_entry(&request.actor)
                        .description("Chain rebuild failed")
                        .failed(e.to_string()),
                );
            }
        }
        // The chain is already rewritten at this point.
        if let Err(e) = self.recorder.flush().await {
            error!(
                actor = %request.actor,
                error = %e,
                "chain rebuild outcome record was not persisted"
            );
        }
        summary
    }

    /// Load, reorder, restamp and replace.  Caller holds the chain lock.
    async fn rewrite_chain(&self) -> CustodianResult<RebuildSummary> {
        let mut records = self.store.scan(ScanRange::all()).await?;
        records.sort_by(|a, b| {
            a.entry
                .created_at
                .cmp(&b.entry.created_at)
                .then(a.id.cmp(&b.id))
        });

        let (rebuilt, hashes_changed) = restamp(records)?;
        let summary = RebuildSummary {
            records_rewritten: rebuilt.len() as u64,
            hashes_changed,
        };
        self.store.replace_chain(rebuilt).await?;
        Ok(summary)
    }
}

/// Restamp `records` in their current order from genesis, keeping ids.
/// Returns the new chain and how many content hashes changed.
fn restamp(records: Vec<AuditRecord>) -> CustodianResult<(Vec<AuditRecord>, u64)> {
    let mut tail: Option<ChainTail> = None;
    let mut rebuilt = Vec::with_capacity(records.len());
    let mut changed = 0u64;

    for old in records {
        let mut record = stamp(tail.as_ref(), old.entry)?;
        record.id = old.id;
        if record.content_hash != old.content_hash {
            changed += 1;
        }
        tail = Some(ChainTail::of(&record));
        rebuilt.push(record);
    }
    Ok((rebuilt, changed))
}
