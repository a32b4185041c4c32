//! Full-run deletion detection.

use tracing::{info, warn};

use dirsync_core::{SourceId, TenantId};

use super::Claims;
use crate::chain::SourceChain;
use crate::error::{SyncError, SyncResult};
use crate::run::SyncRun;
use crate::store::IdentityStore;

/// Result of deletion detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Whether detection ran at all.
    pub executed: bool,
    /// Sources whose tombstone writes failed, with the error.
    pub failed_sources: Vec<(SourceId, String)>,
}

/// Tombstone every principal owned by an active source that the source did
/// not claim during this run.
///
/// Does nothing unless `run` permits deletion (a full run where every active
/// source reported `Ok`). With `allow_deletions` off, candidates are only
/// logged and counted. A failed tombstone write stops that source's
/// deletions and is reported; a store outage aborts.
pub async fn detect_deletions(
    tenant_id: TenantId,
    chain: &SourceChain,
    run: &mut SyncRun,
    claims: &Claims,
    store: &dyn IdentityStore,
    allow_deletions: bool,
) -> SyncResult<DeletionReport> {
    if !run.deletion_permitted(chain) {
        info!(
            tenant_id = %tenant_id,
            mode = %run.mode,
            "Skipping deletion detection: not every source completed a full fetch"
        );
        return Ok(DeletionReport::default());
    }

    let mut report = DeletionReport {
        executed: true,
        failed_sources: Vec::new(),
    };

    for source in chain.sources().filter(|source| source.active) {
        let owned = store.list_owned_by(tenant_id, &source.id).await?;
        for principal in owned {
            let key = principal.key();
            if claims.contains(&source.id, &key) {
                continue;
            }

            if !allow_deletions {
                warn!(
                    tenant_id = %tenant_id,
                    source_id = %source.id,
                    identifier = %principal.identifier,
                    "Principal no longer in source but deletions are disabled"
                );
                run.statistics.source_mut(&source.id).deletions_suppressed += 1;
                continue;
            }

            match store.tombstone(tenant_id, &key).await {
                Ok(true) => {
                    info!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        identifier = %principal.identifier,
                        "Principal tombstoned"
                    );
                    run.statistics.source_mut(&source.id).tombstoned += 1;
                }
                Ok(false) => {}
                Err(e) if e.is_outage() => return Err(SyncError::from(e)),
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        error = %e,
                        "Deletion failed, skipping remaining deletions for source"
                    );
                    report.failed_sources.push((source.id.clone(), e.to_string()));
                    break;
                }
            }
        }
    }

    Ok(report)
}
