//! Cursor bookkeeping.
//!
//! Cursor writes are planned from the finished apply phase and committed in
//! one step, after the run has confirmed it still holds the lock. Nothing
//! touches the cursor store earlier in a run.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use dirsync_core::{SourceId, TenantId};

use crate::chain::SourceChain;
use crate::run::{SourceStatus, SyncMode, SyncRun};
use crate::store::CursorStore;

/// Watermarks observed for one source during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceWatermarks {
    /// Cursor value when the run started.
    pub stored: Option<DateTime<Utc>>,
    /// Latest `last_modified_at_source` among fetched records.
    pub max_seen: Option<DateTime<Utc>>,
}

impl SourceWatermarks {
    /// Fold a record timestamp into `max_seen`.
    pub fn observe(&mut self, timestamp: DateTime<Utc>) {
        self.max_seen = Some(self.max_seen.map_or(timestamp, |seen| seen.max(timestamp)));
    }

    /// Watermark after a differential apply: never moves backwards, and an
    /// empty batch leaves it as is.
    #[must_use]
    pub fn advanced(&self) -> Option<DateTime<Utc>> {
        match (self.stored, self.max_seen) {
            (Some(stored), Some(seen)) => Some(stored.max(seen)),
            (None, seen) => seen,
            (stored, None) => stored,
        }
    }
}

/// One planned cursor write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorUpdate {
    /// Move the cursor forward.
    Advance {
        source_id: SourceId,
        watermark: DateTime<Utc>,
    },
    /// Reset the cursor, then set it to the start of the full run.
    Restart {
        source_id: SourceId,
        watermark: DateTime<Utc>,
    },
}

/// Cursor writes for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorPlan {
    updates: Vec<CursorUpdate>,
}

impl CursorPlan {
    /// Plan cursor writes.
    ///
    /// - Single-identity runs never touch cursors.
    /// - A full run in which every active source reported `Ok` restarts each
    ///   active cursor at the run's start time.
    /// - Otherwise each `Ok` source advances monotonically to the newest
    ///   record it returned; failed sources are untouched.
    #[must_use]
    pub fn build(
        run: &SyncRun,
        chain: &SourceChain,
        watermarks: &BTreeMap<SourceId, SourceWatermarks>,
    ) -> Self {
        if matches!(run.mode, SyncMode::SingleIdentity { .. }) {
            return Self::default();
        }

        let full_success = run.deletion_permitted(chain);
        let mut updates = Vec::new();
        for source in chain.sources().filter(|source| source.active) {
            if run.source_status(&source.id) != Some(SourceStatus::Ok) {
                continue;
            }
            if full_success {
                updates.push(CursorUpdate::Restart {
                    source_id: source.id.clone(),
                    watermark: run.started_at,
                });
                continue;
            }

            let marks = watermarks.get(&source.id).copied().unwrap_or_default();
            match marks.advanced() {
                Some(watermark) if Some(watermark) != marks.stored => {
                    updates.push(CursorUpdate::Advance {
                        source_id: source.id.clone(),
                        watermark,
                    });
                }
                _ => {}
            }
        }
        Self { updates }
    }

    /// Planned writes.
    #[must_use]
    pub fn updates(&self) -> &[CursorUpdate] {
        &self.updates
    }

    /// Whether there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Write the plan. A failing write is logged and leaves that cursor
    /// where it was, so the next run re-reads the same records.
    pub async fn commit(&self, store: &dyn CursorStore, tenant_id: TenantId) -> usize {
        let mut written = 0;
        for update in &self.updates {
            let result = match update {
                CursorUpdate::Advance {
                    source_id,
                    watermark,
                } => store.set(tenant_id, source_id, *watermark).await,
                CursorUpdate::Restart {
                    source_id,
                    watermark,
                } => match store.reset(tenant_id, source_id).await {
                    Ok(()) => store.set(tenant_id, source_id, *watermark).await,
                    Err(e) => Err(e),
                },
            };
            match result {
                Ok(()) => {
                    debug!(tenant_id = %tenant_id, update = ?update, "Cursor written");
                    written += 1;
                }
                Err(e) => {
                    warn!(tenant_id = %tenant_id, update = ?update, error = %e, "Cursor write failed");
                }
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainLink, Source};
    use crate::run::RunState;
    use crate::store::MemoryCursorStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use dirsync_core::PrincipalKind;
    use dirsync_directory::{DirectorySource, RemoteRecord, SourceResult};
    use std::sync::Arc;

    struct Silent;

    #[async_trait]
    impl DirectorySource for Silent {
        fn display_name(&self) -> &str {
            "silent"
        }

        fn supports_incremental_query(&self) -> bool {
            true
        }

        async fn fetch(
            &self,
            _tenant_id: TenantId,
            _kind: PrincipalKind,
            _since: Option<DateTime<Utc>>,
        ) -> SourceResult<Vec<RemoteRecord>> {
            Ok(Vec::new())
        }

        async fn fetch_one(
            &self,
            _tenant_id: TenantId,
            _kind: PrincipalKind,
            _identifier: &str,
        ) -> SourceResult<Option<RemoteRecord>> {
            Ok(None)
        }
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()
    }

    fn chain() -> SourceChain {
        SourceChain::new(vec![
            ChainLink::new(Source::new("a", 0), Arc::new(Silent)),
            ChainLink::new(Source::new("b", 1), Arc::new(Silent)),
        ])
        .unwrap()
    }

    fn marks(stored: Option<u32>, seen: Option<u32>) -> SourceWatermarks {
        SourceWatermarks {
            stored: stored.map(ts),
            max_seen: seen.map(ts),
        }
    }

    #[test]
    fn test_watermark_never_moves_back() {
        assert_eq!(marks(Some(5), Some(3)).advanced(), Some(ts(5)));
        assert_eq!(marks(Some(5), Some(7)).advanced(), Some(ts(7)));
        assert_eq!(marks(None, Some(2)).advanced(), Some(ts(2)));
        assert_eq!(marks(Some(5), None).advanced(), Some(ts(5)));
        assert_eq!(marks(None, None).advanced(), None);
    }

    #[test]
    fn test_observe_keeps_max() {
        let mut marks = SourceWatermarks::default();
        marks.observe(ts(4));
        marks.observe(ts(2));
        assert_eq!(marks.max_seen, Some(ts(4)));
    }

    #[test]
    fn test_differential_plan_skips_failed_and_unchanged() {
        let chain = chain();
        let mut run = SyncRun::new(TenantId::new(), SyncMode::Differential);
        run.set_source_status(&SourceId::new("a"), SourceStatus::Ok);
        run.set_source_status(&SourceId::new("b"), SourceStatus::Failed);

        let mut watermarks = BTreeMap::new();
        watermarks.insert(SourceId::new("a"), marks(Some(1), Some(3)));
        watermarks.insert(SourceId::new("b"), marks(Some(1), Some(9)));
        let plan = CursorPlan::build(&run, &chain, &watermarks);
        assert_eq!(
            plan.updates(),
            &[CursorUpdate::Advance {
                source_id: SourceId::new("a"),
                watermark: ts(3)
            }]
        );

        watermarks.insert(SourceId::new("a"), marks(Some(3), None));
        assert!(CursorPlan::build(&run, &chain, &watermarks).is_empty());
    }

    #[test]
    fn test_full_success_restarts_at_run_start() {
        let chain = chain();
        let mut run = SyncRun::new(TenantId::new(), SyncMode::Full);
        run.set_source_status(&SourceId::new("a"), SourceStatus::Ok);
        run.set_source_status(&SourceId::new("b"), SourceStatus::Ok);

        let plan = CursorPlan::build(&run, &chain, &BTreeMap::new());
        assert_eq!(plan.updates().len(), 2);
        assert!(plan.updates().iter().all(|update| matches!(
            update,
            CursorUpdate::Restart { watermark, .. } if *watermark == run.started_at
        )));
    }

    #[test]
    fn test_full_partial_failure_advances_ok_sources_only() {
        let chain = chain();
        let mut run = SyncRun::new(TenantId::new(), SyncMode::Full);
        run.set_source_status(&SourceId::new("a"), SourceStatus::Failed);
        run.set_source_status(&SourceId::new("b"), SourceStatus::Ok);

        let mut watermarks = BTreeMap::new();
        watermarks.insert(SourceId::new("b"), marks(Some(2), Some(4)));
        let plan = CursorPlan::build(&run, &chain, &watermarks);
        assert_eq!(
            plan.updates(),
            &[CursorUpdate::Advance {
                source_id: SourceId::new("b"),
                watermark: ts(4)
            }]
        );
    }

    #[test]
    fn test_single_identity_never_plans() {
        let chain = chain();
        let mut run = SyncRun::new(TenantId::new(), SyncMode::single(PrincipalKind::User, "x"));
        run.set_source_status(&SourceId::new("a"), SourceStatus::Ok);
        let mut watermarks = BTreeMap::new();
        watermarks.insert(SourceId::new("a"), marks(None, Some(4)));
        assert!(CursorPlan::build(&run, &chain, &watermarks).is_empty());
        assert_eq!(run.state, RunState::Pending);
    }

    #[tokio::test]
    async fn test_commit_writes_store() {
        let store = MemoryCursorStore::new();
        let tenant = TenantId::new();
        store.set(tenant, &SourceId::new("a"), ts(9)).await.unwrap();

        let plan = CursorPlan {
            updates: vec![
                CursorUpdate::Restart {
                    source_id: SourceId::new("a"),
                    watermark: ts(1),
                },
                CursorUpdate::Advance {
                    source_id: SourceId::new("b"),
                    watermark: ts(2),
                },
            ],
        };
        assert_eq!(plan.commit(&store, tenant).await, 2);
        assert_eq!(store.get(tenant, &SourceId::new("a")).await.unwrap(), Some(ts(1)));
        assert_eq!(store.get(tenant, &SourceId::new("b")).await.unwrap(), Some(ts(2)));
    }
}
