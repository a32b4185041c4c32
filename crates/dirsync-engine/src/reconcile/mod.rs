//! Reconciliation engine.
//!
//! Merges source batches into the identity store one source at a time, in
//! ascending precedence. The per-record decision is the pure function
//! [`decide`]; [`Reconciler`] applies decisions and tracks which identities
//! each source claimed during the run, which is what full-run deletion
//! detection ([`deletion`]) works from.

pub mod deletion;
pub mod membership;

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use dirsync_core::{PrincipalKey, SourceId, TenantId};
use dirsync_directory::RemoteRecord;

use crate::chain::{Source, SourceChain};
use crate::error::{SyncError, SyncResult};
use crate::principal::Principal;
use crate::statistics::SourceStatistics;
use crate::store::IdentityStore;

pub use deletion::{detect_deletions, DeletionReport};
pub use membership::{prune_cycles, PrunedEdge};

/// What to do with one remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// No live principal: create one owned by the source.
    Create,
    /// Already owned by the source: overwrite.
    Update,
    /// Owned by a lower-priority source: transfer ownership and overwrite.
    TakeOver { previous_owner: SourceId },
    /// Owned by a source no longer in the chain: transfer and overwrite.
    Rezone { previous_owner: SourceId },
    /// Owned by a higher-priority source: leave untouched.
    Ignore { owner: SourceId },
}

impl MergeDecision {
    /// Whether the record is written and claimed by the source.
    #[must_use]
    pub fn claims(&self) -> bool {
        !matches!(self, MergeDecision::Ignore { .. })
    }
}

/// Decide how a record from `source` merges with the live principal that
/// has the same key.
///
/// Only explicit precedences are compared. An owner missing from `chain`
/// ranks below every source in it.
#[must_use]
pub fn decide(chain: &SourceChain, source: &Source, existing: Option<&Principal>) -> MergeDecision {
    let Some(existing) = existing else {
        return MergeDecision::Create;
    };
    if existing.is_owned_by(&source.id) {
        return MergeDecision::Update;
    }

    let previous_owner = existing.owner_source_id.clone();
    match chain.precedence_of(&previous_owner) {
        None => MergeDecision::Rezone { previous_owner },
        Some(owner_precedence) if source.outranks(owner_precedence) => {
            MergeDecision::TakeOver { previous_owner }
        }
        Some(_) => MergeDecision::Ignore {
            owner: previous_owner,
        },
    }
}

/// Identities each source reported during one run, written or not.
#[derive(Debug, Clone, Default)]
pub struct Claims {
    by_source: HashMap<SourceId, HashSet<PrincipalKey>>,
}

impl Claims {
    /// Create an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as reported by `source_id`.
    pub fn claim(&mut self, source_id: &SourceId, key: PrincipalKey) {
        self.by_source
            .entry(source_id.clone())
            .or_default()
            .insert(key);
    }

    /// Whether `source_id` claimed `key` this run.
    #[must_use]
    pub fn contains(&self, source_id: &SourceId, key: &PrincipalKey) -> bool {
        self.by_source
            .get(source_id)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Number of identities claimed by a source.
    #[must_use]
    pub fn count(&self, source_id: &SourceId) -> usize {
        self.by_source.get(source_id).map_or(0, HashSet::len)
    }
}

/// Applies source batches to the identity store for one tenant and run.
pub struct Reconciler<'a> {
    tenant_id: TenantId,
    chain: &'a SourceChain,
    store: &'a dyn IdentityStore,
    claims: Claims,
    logging_interval: usize,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        chain: &'a SourceChain,
        store: &'a dyn IdentityStore,
        logging_interval: usize,
    ) -> Self {
        Self {
            tenant_id,
            chain,
            store,
            claims: Claims::new(),
            logging_interval: logging_interval.max(1),
        }
    }

    /// Claims made so far.
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Apply one source's batch.
    ///
    /// Invalid records are skipped, but a source still holds the identity
    /// behind a readable identifier, so its key is claimed and never
    /// tombstoned. A failed write stops the batch with
    /// [`SyncError::Persistence`]; a store outage with
    /// [`SyncError::StoreUnavailable`]. `checkpoint` runs before every write
    /// and its error stops the batch.
    pub async fn apply_batch<C>(
        &mut self,
        source: &Source,
        mut records: Vec<RemoteRecord>,
        stats: &mut SourceStatistics,
        checkpoint: C,
    ) -> SyncResult<()>
    where
        C: Fn() -> SyncResult<()>,
    {
        let mut held = Vec::new();
        records.retain(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                let err = SyncError::record_validation(source.id.clone(), &record.identifier, e);
                warn!(source_id = %source.id, error = %err, "Skipping invalid record");
                stats.invalid_records += 1;
                if !record.identifier.trim().is_empty() {
                    held.push(record.key());
                }
                false
            }
        });
        for key in held {
            self.claims.claim(&source.id, key);
        }

        let pruned = prune_cycles(&source.id, &mut records);
        stats.memberships_pruned += u32::try_from(pruned.len()).unwrap_or(u32::MAX);

        let total = records.len();
        for (index, record) in records.iter().enumerate() {
            checkpoint()?;
            self.apply_record(source, record, stats).await?;

            let processed = index + 1;
            if processed % self.logging_interval == 0 && processed < total {
                info!(
                    tenant_id = %self.tenant_id,
                    source_id = %source.id,
                    processed,
                    total,
                    "Synchronization progress"
                );
            }
        }
        Ok(())
    }

    /// Apply one validated record and return the decision taken.
    pub async fn apply_record(
        &mut self,
        source: &Source,
        record: &RemoteRecord,
        stats: &mut SourceStatistics,
    ) -> SyncResult<MergeDecision> {
        let key = record.key();
        let existing = self.store.find_by_identifier(self.tenant_id, &key).await?;
        let decision = decide(self.chain, source, existing.as_ref());

        match &decision {
            MergeDecision::Create => stats.created += 1,
            MergeDecision::Update => stats.updated += 1,
            MergeDecision::TakeOver { previous_owner } => {
                warn!(
                    tenant_id = %self.tenant_id,
                    identifier = %record.identifier,
                    winner = %source.id,
                    loser = %previous_owner,
                    "Identity collision resolved in favour of higher-priority source"
                );
                stats.taken_over += 1;
            }
            MergeDecision::Rezone { previous_owner } => {
                warn!(
                    tenant_id = %self.tenant_id,
                    identifier = %record.identifier,
                    source_id = %source.id,
                    previous_owner = %previous_owner,
                    "Re-zoning identity from source no longer in the chain"
                );
                stats.rezoned += 1;
            }
            MergeDecision::Ignore { owner } => {
                warn!(
                    tenant_id = %self.tenant_id,
                    identifier = %record.identifier,
                    winner = %owner,
                    loser = %source.id,
                    "Identity collision: record ignored, owned by higher-priority source"
                );
                stats.collisions_ignored += 1;
                return Ok(decision);
            }
        }

        let principal = Principal::from_record(self.tenant_id, &source.id, record);
        self.store.upsert(&principal).await.map_err(|e| {
            debug!(key = %key, error = %e, "Identity write failed");
            SyncError::from(e)
        })?;
        self.claims.claim(&source.id, key);
        Ok(decision)
    }
}
