//! Sync orchestrator.
//!
//! Drives one run per call: read-only guard, lock acquisition, concurrent
//! source fetches, strictly ordered application, deletion detection, cursor
//! advancement and run bookkeeping.
//!
//! Fetches run concurrently (bounded by `max_concurrent_fetches`), each
//! under its own timeout. Batches are applied in ascending precedence, so a
//! slow source holds back the sources behind it until it resolves.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use dirsync_core::{PrincipalKey, PrincipalKind, SourceId, TenantId};
use dirsync_directory::{DirectorySource, FetchPolicy, RemoteRecord, SourceError, SourceResult};

use crate::chain::{ChainLink, SourceChain};
use crate::config::SyncConfig;
use crate::cursor::{CursorPlan, SourceWatermarks};
use crate::error::{SyncError, SyncResult};
use crate::lock::{acquire_with_retry, ClusterLock, LeaseKeeper, LockAcquisition, LockKey};
use crate::principal::Principal;
use crate::reconcile::{detect_deletions, Reconciler};
use crate::run::{RunState, SourceStatus, SyncMode, SyncRun};
use crate::statistics::SourceStatistics;
use crate::store::{CursorStore, IdentityStore, RunStore};

/// Result of looking up an unknown identity on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum OnDemandOutcome {
    /// The principal exists locally (possibly just synchronized).
    Found { principal: Principal },
    /// Every source answered and none knows the identity.
    NotFound,
    /// No source knows the identity, but some could not be asked.
    Inconclusive { unreachable: Vec<SourceId> },
    /// The highest-priority source holding the identity returned a record
    /// that cannot be stored.
    Rejected { source_id: SourceId, reason: String },
    /// The run did not take place.
    Skipped { reason: String },
    /// On-demand synchronization is switched off.
    Disabled,
}

/// Outcome of a single-identity walk along the chain.
#[derive(Debug, Default)]
struct LookupResult {
    found_in: Option<SourceId>,
    rejected: Option<(SourceId, String)>,
    unreachable: Vec<SourceId>,
}

/// Outstanding source queries in chain order. Aborted when dropped.
struct PendingFetches {
    handles: Vec<JoinHandle<SourceResult<Vec<RemoteRecord>>>>,
}

impl PendingFetches {
    async fn join(&mut self, index: usize) -> SourceResult<Vec<RemoteRecord>> {
        let Some(handle) = self.handles.get_mut(index) else {
            return Err(SourceError::internal("no fetch scheduled for source"));
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(SourceError::internal(format!("fetch task failed: {e}"))),
        }
    }
}

impl Drop for PendingFetches {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Coordinates synchronization runs for any number of tenants.
pub struct SyncOrchestrator {
    chain: SourceChain,
    identities: Arc<dyn IdentityStore>,
    cursors: Arc<dyn CursorStore>,
    runs: Arc<dyn RunStore>,
    lock: Arc<dyn ClusterLock>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        chain: SourceChain,
        identities: Arc<dyn IdentityStore>,
        cursors: Arc<dyn CursorStore>,
        runs: Arc<dyn RunStore>,
        lock: Arc<dyn ClusterLock>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            chain,
            identities,
            cursors,
            runs,
            lock,
            config,
        })
    }

    /// The source chain.
    #[must_use]
    pub fn chain(&self) -> &SourceChain {
        &self.chain
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run a full synchronization.
    pub async fn full(&self, tenant_id: TenantId) -> SyncResult<SyncRun> {
        self.synchronize(tenant_id, SyncMode::Full).await
    }

    /// Run a differential synchronization.
    pub async fn differential(&self, tenant_id: TenantId) -> SyncResult<SyncRun> {
        self.synchronize(tenant_id, SyncMode::Differential).await
    }

    /// Run one synchronization for a tenant.
    ///
    /// A run that cannot take the lock, or finds the identity store
    /// read-only, is returned normally in state `Skipped`. Lock loss and
    /// store outages abort the run: it is recorded as `Aborted`, cursors are
    /// left untouched and the error is returned.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, mode = %mode))]
    pub async fn synchronize(&self, tenant_id: TenantId, mode: SyncMode) -> SyncResult<SyncRun> {
        let (run, _) = self.execute(tenant_id, mode).await?;
        Ok(run)
    }

    /// Synchronize several tenants one after another. A failing tenant is
    /// logged and does not stop the others.
    pub async fn synchronize_tenants(
        &self,
        tenants: &[TenantId],
        mode: SyncMode,
    ) -> Vec<(TenantId, SyncResult<SyncRun>)> {
        let mut results = Vec::with_capacity(tenants.len());
        for &tenant_id in tenants {
            let result = self.synchronize(tenant_id, mode.clone()).await;
            if let Err(e) = &result {
                error!(
                    tenant_id = %tenant_id,
                    error = %e,
                    error_code = e.error_code(),
                    "Tenant synchronization failed"
                );
            }
            results.push((tenant_id, result));
        }
        results
    }

    /// Differential synchronization of every tenant, if enabled.
    pub async fn startup(&self, tenants: &[TenantId]) -> Vec<(TenantId, SyncResult<SyncRun>)> {
        if !self.config.sync_on_startup {
            info!("Startup synchronization disabled");
            return Vec::new();
        }
        info!(tenants = tenants.len(), "Running startup synchronization");
        self.synchronize_tenants(tenants, SyncMode::Differential).await
    }

    /// Make sure an identity that just authenticated exists locally, looking
    /// it up along the chain if it does not.
    #[instrument(skip(self))]
    pub async fn ensure_principal(
        &self,
        tenant_id: TenantId,
        kind: PrincipalKind,
        identifier: &str,
    ) -> SyncResult<OnDemandOutcome> {
        if !self.config.sync_when_missing_principal_logs_in {
            return Ok(OnDemandOutcome::Disabled);
        }

        let key = PrincipalKey::new(kind, identifier);
        if let Some(principal) = self.identities.find_by_identifier(tenant_id, &key).await? {
            return Ok(OnDemandOutcome::Found { principal });
        }

        let (run, lookup) = self
            .execute(tenant_id, SyncMode::single(kind, identifier))
            .await?;
        if run.state == RunState::Skipped {
            return Ok(OnDemandOutcome::Skipped {
                reason: run.reason.unwrap_or_default(),
            });
        }

        let lookup = lookup.unwrap_or_default();
        if let Some((source_id, reason)) = lookup.rejected {
            return Ok(OnDemandOutcome::Rejected { source_id, reason });
        }
        if lookup.found_in.is_some() {
            if let Some(principal) = self.identities.find_by_identifier(tenant_id, &key).await? {
                return Ok(OnDemandOutcome::Found { principal });
            }
        }
        if lookup.unreachable.is_empty() {
            Ok(OnDemandOutcome::NotFound)
        } else {
            Ok(OnDemandOutcome::Inconclusive {
                unreachable: lookup.unreachable,
            })
        }
    }

    /// Names of the attributes mapped by the source owning a principal.
    ///
    /// Empty when the principal is unknown or its owner is not an active
    /// source of the chain.
    pub async fn mapped_attributes(
        &self,
        tenant_id: TenantId,
        kind: PrincipalKind,
        identifier: &str,
    ) -> SyncResult<Vec<String>> {
        let key = PrincipalKey::new(kind, identifier);
        let Some(principal) = self.identities.find_by_identifier(tenant_id, &key).await? else {
            return Ok(Vec::new());
        };
        match self.chain.get(&principal.owner_source_id) {
            Some(link) if link.source.active => Ok(link.adapter.mapped_attributes()),
            _ => Ok(Vec::new()),
        }
    }

    async fn execute(
        &self,
        tenant_id: TenantId,
        mode: SyncMode,
    ) -> SyncResult<(SyncRun, Option<LookupResult>)> {
        let mut run = SyncRun::new(tenant_id, mode.clone());
        self.record_created(&run).await;

        match self.identities.is_read_only().await {
            Ok(false) => {}
            Ok(true) => {
                warn!(tenant_id = %tenant_id, "Identity store is read-only, skipping synchronization");
                run.skip("identity store is read-only")?;
                self.record_update(&run).await;
                return Ok((run, None));
            }
            Err(e) => return Err(self.abort_run(&mut run, e.into()).await),
        }

        let key = LockKey::sync(tenant_id);
        let attempts = match mode {
            SyncMode::SingleIdentity { .. } => self.config.on_demand_lock_attempts,
            SyncMode::Full | SyncMode::Differential => 1,
        };
        let acquisition = acquire_with_retry(
            self.lock.as_ref(),
            &key,
            self.config.lock_ttl(),
            attempts,
            self.config.on_demand_lock_retry_delay(),
        )
        .await;
        let handle = match acquisition {
            Ok(LockAcquisition::Acquired(handle)) => handle,
            Ok(LockAcquisition::AlreadyHeld) => {
                info!(tenant_id = %tenant_id, lock = %key, "Synchronization already running elsewhere, skipping");
                run.skip("synchronization lock held elsewhere")?;
                self.record_update(&run).await;
                return Ok((run, None));
            }
            Err(e) => return Err(self.abort_run(&mut run, e.into()).await),
        };

        let keeper = LeaseKeeper::spawn(self.lock.clone(), handle);
        let result = match run.transition(RunState::LockAcquired) {
            Ok(()) => match mode {
                SyncMode::SingleIdentity { kind, identifier } => self
                    .lookup_locked(&mut run, &keeper, kind, &identifier)
                    .await
                    .map(Some),
                SyncMode::Full | SyncMode::Differential => {
                    self.sync_locked(&mut run, &keeper).await.map(|()| None)
                }
            },
            Err(e) => Err(e),
        };
        keeper.release().await;

        match result {
            Ok(lookup) => {
                self.record_update(&run).await;
                log_summary(&run);
                Ok((run, lookup))
            }
            Err(e) => Err(self.abort_run(&mut run, e).await),
        }
    }

    async fn sync_locked(&self, run: &mut SyncRun, keeper: &LeaseKeeper) -> SyncResult<()> {
        let tenant_id = run.tenant_id;
        let differential = matches!(run.mode, SyncMode::Differential);
        run.transition(RunState::Fetching)?;

        let mut watermarks: BTreeMap<SourceId, SourceWatermarks> = BTreeMap::new();
        let mut active: Vec<(&ChainLink, Option<DateTime<Utc>>)> = Vec::new();
        for link in self.chain.links() {
            let source = &link.source;
            if !source.active {
                info!(tenant_id = %tenant_id, source_id = %source.id, "Skipping inactive source");
                run.set_source_status(&source.id, SourceStatus::Skipped);
                continue;
            }
            let stored = match self.cursors.get(tenant_id, &source.id).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        error = %e,
                        "Cursor unreadable, skipping source for this run"
                    );
                    run.fail_source(&source.id, format!("cursor read failed: {e}"));
                    continue;
                }
            };
            watermarks.insert(
                source.id.clone(),
                SourceWatermarks {
                    stored,
                    max_seen: None,
                },
            );
            let since = if differential && source.supports_incremental_query {
                stored
            } else {
                None
            };
            active.push((link, since));
        }

        let mut pending = self.spawn_fetches(tenant_id, &active);
        run.transition(RunState::Applying)?;

        let mut reconciler = Reconciler::new(
            tenant_id,
            &self.chain,
            self.identities.as_ref(),
            self.config.logging_interval,
        );
        for (index, (link, since)) in active.iter().enumerate() {
            let source = &link.source;
            let fetched = pending.join(index).await;
            keeper.confirm().await?;

            let records = match fetched {
                Ok(records) => records,
                Err(e) => {
                    let err = SyncError::source_unavailable(source.id.clone(), e);
                    warn!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        error = %err,
                        "Source failed, continuing with next source"
                    );
                    run.fail_source(&source.id, err.to_string());
                    continue;
                }
            };

            let marks = watermarks.entry(source.id.clone()).or_default();
            for record in &records {
                marks.observe(record.last_modified_at_source);
            }

            info!(
                tenant_id = %tenant_id,
                source_id = %source.id,
                records = records.len(),
                since = ?since,
                "Applying source batch"
            );
            let mut stats = SourceStatistics {
                fetched: u32::try_from(records.len()).unwrap_or(u32::MAX),
                ..SourceStatistics::default()
            };
            let applied = reconciler
                .apply_batch(source, records, &mut stats, || keeper.ensure_held())
                .await;
            run.statistics.source_mut(&source.id).merge(&stats);

            match applied {
                Ok(()) => run.set_source_status(&source.id, SourceStatus::Ok),
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        error = %e,
                        "Applying source batch failed, continuing with next source"
                    );
                    run.fail_source(&source.id, e.to_string());
                }
            }
        }
        drop(pending);

        if run.mode.is_full() {
            if run.deletion_permitted(&self.chain) {
                keeper.confirm().await?;
            }
            let report = detect_deletions(
                tenant_id,
                &self.chain,
                run,
                reconciler.claims(),
                self.identities.as_ref(),
                self.config.allow_deletions,
            )
            .await?;
            run.deletions_detected = report.executed;
            for (source_id, error) in report.failed_sources {
                run.fail_source(&source_id, error);
            }
        }

        run.transition(RunState::CursorAdvance)?;
        keeper.confirm().await?;
        let plan = CursorPlan::build(run, &self.chain, &watermarks);
        let written = plan.commit(self.cursors.as_ref(), tenant_id).await;
        debug!(tenant_id = %tenant_id, planned = plan.updates().len(), written, "Cursors advanced");

        run.finish()
    }

    async fn lookup_locked(
        &self,
        run: &mut SyncRun,
        keeper: &LeaseKeeper,
        kind: PrincipalKind,
        identifier: &str,
    ) -> SyncResult<LookupResult> {
        let tenant_id = run.tenant_id;
        let policy = self.config.fetch_policy();
        run.transition(RunState::Fetching)?;

        let key = PrincipalKey::new(kind, identifier);
        let mut lookup = LookupResult::default();
        let mut hit = None;
        for link in self.chain.links() {
            let source = &link.source;
            if !source.active || hit.is_some() {
                run.set_source_status(&source.id, SourceStatus::Skipped);
                continue;
            }
            keeper.confirm().await?;

            let adapter = link.adapter.as_ref();
            match policy
                .execute(|| adapter.fetch_one(tenant_id, kind, identifier))
                .await
            {
                Ok(Some(record)) if record.key() != key => {
                    let err = SyncError::source_unavailable(
                        source.id.clone(),
                        SourceError::invalid_data(format!(
                            "lookup of {key} answered with {}",
                            record.key()
                        )),
                    );
                    warn!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        error = %err,
                        "Source answered identity lookup with another identity"
                    );
                    run.fail_source(&source.id, err.to_string());
                    lookup.unreachable.push(source.id.clone());
                }
                Ok(Some(record)) => {
                    debug!(tenant_id = %tenant_id, source_id = %source.id, identifier, "Identity found");
                    run.set_source_status(&source.id, SourceStatus::Ok);
                    hit = Some((link, record));
                }
                Ok(None) => run.set_source_status(&source.id, SourceStatus::Ok),
                Err(e) => {
                    let err = SyncError::source_unavailable(source.id.clone(), e);
                    warn!(
                        tenant_id = %tenant_id,
                        source_id = %source.id,
                        error = %err,
                        "Source unreachable during identity lookup"
                    );
                    run.fail_source(&source.id, err.to_string());
                    lookup.unreachable.push(source.id.clone());
                }
            }
        }

        run.transition(RunState::Applying)?;
        if let Some((link, record)) = hit {
            let source = &link.source;
            keeper.confirm().await?;
            let mut stats = SourceStatistics {
                fetched: 1,
                ..SourceStatistics::default()
            };

            if let Err(e) = record.validate() {
                let err = SyncError::record_validation(source.id.clone(), &record.identifier, e);
                warn!(tenant_id = %tenant_id, source_id = %source.id, error = %err, "Identity found but rejected");
                stats.invalid_records += 1;
                lookup.rejected = Some((source.id.clone(), err.to_string()));
            } else {
                let mut reconciler = Reconciler::new(
                    tenant_id,
                    &self.chain,
                    self.identities.as_ref(),
                    self.config.logging_interval,
                );
                let applied = reconciler
                    .apply_batch(source, vec![record], &mut stats, || keeper.ensure_held())
                    .await;

                match applied {
                    Ok(()) => lookup.found_in = Some(source.id.clone()),
                    Err(e) if e.aborts_run() => {
                        run.statistics.source_mut(&source.id).merge(&stats);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(tenant_id = %tenant_id, source_id = %source.id, error = %e, "Applying identity failed");
                        run.fail_source(&source.id, e.to_string());
                        lookup.unreachable.push(source.id.clone());
                    }
                }
            }
            run.statistics.source_mut(&source.id).merge(&stats);
        }

        run.transition(RunState::CursorAdvance)?;
        run.finish()?;
        Ok(lookup)
    }

    fn spawn_fetches(
        &self,
        tenant_id: TenantId,
        active: &[(&ChainLink, Option<DateTime<Utc>>)],
    ) -> PendingFetches {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches));
        let policy = self.config.fetch_policy();

        let handles = active
            .iter()
            .map(|(link, since)| {
                let adapter = link.adapter.clone();
                let source_id = link.source.id.clone();
                let semaphore = semaphore.clone();
                let policy = policy.clone();
                let since = *since;
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| SourceError::internal("fetch limiter closed"))?;
                    fetch_source(adapter.as_ref(), &source_id, tenant_id, since, &policy).await
                })
            })
            .collect();

        PendingFetches { handles }
    }

    async fn abort_run(&self, run: &mut SyncRun, err: SyncError) -> SyncError {
        error!(
            tenant_id = %run.tenant_id,
            run_id = %run.id,
            state = %run.state,
            error = %err,
            error_code = err.error_code(),
            "Synchronization run aborted"
        );
        if !run.state.is_terminal() {
            if let Err(e) = run.abort(err.to_string()) {
                warn!(run_id = %run.id, error = %e, "Could not mark run aborted");
            }
        }
        self.record_update(run).await;
        err
    }

    async fn record_created(&self, run: &SyncRun) {
        if let Err(e) = self.runs.create(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to record sync run");
        }
    }

    async fn record_update(&self, run: &SyncRun) {
        if let Err(e) = self.runs.update(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to update sync run");
        }
    }
}

async fn fetch_source(
    adapter: &dyn DirectorySource,
    source_id: &SourceId,
    tenant_id: TenantId,
    since: Option<DateTime<Utc>>,
    policy: &FetchPolicy,
) -> SourceResult<Vec<RemoteRecord>> {
    if !adapter.is_healthy() {
        return Err(SourceError::unavailable(format!(
            "{} reports unhealthy",
            adapter.display_name()
        )));
    }
    policy
        .execute(|| fetch_all_kinds(adapter, source_id, tenant_id, since))
        .await
}

/// Groups first, then users.
async fn fetch_all_kinds(
    adapter: &dyn DirectorySource,
    source_id: &SourceId,
    tenant_id: TenantId,
    since: Option<DateTime<Utc>>,
) -> SourceResult<Vec<RemoteRecord>> {
    let mut records = Vec::new();
    for kind in PrincipalKind::fetch_order() {
        let batch = match adapter.fetch(tenant_id, kind, since).await {
            Err(SourceError::IncrementalNotSupported) if since.is_some() => {
                debug!(source_id = %source_id, kind = %kind, "Incremental query rejected, fetching full dataset");
                adapter.fetch(tenant_id, kind, None).await?
            }
            other => other?,
        };
        debug!(source_id = %source_id, kind = %kind, count = batch.len(), "Fetched records");
        records.extend(batch);
    }
    Ok(records)
}

fn log_summary(run: &SyncRun) {
    let totals = run.statistics.totals();
    info!(
        tenant_id = %run.tenant_id,
        run_id = %run.id,
        mode = %run.mode,
        state = %run.state,
        fetched = totals.fetched,
        created = totals.created,
        updated = totals.updated,
        taken_over = totals.taken_over,
        rezoned = totals.rezoned,
        collisions_ignored = totals.collisions_ignored,
        invalid_records = totals.invalid_records,
        tombstoned = totals.tombstoned,
        deletions_suppressed = totals.deletions_suppressed,
        duration_ms = run.statistics.duration_ms,
        "Synchronization run finished"
    );
}
