//! Integration test helpers for dirsync-engine.
//!
//! Provides a scripted directory source and a harness wiring an
//! orchestrator to in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dirsync_core::{PrincipalKey, PrincipalKind, SourceId, TenantId};
use dirsync_directory::{DirectorySource, RemoteRecord, RetryConfig, SourceError, SourceResult};
use dirsync_engine::{
    ChainLink, IdentityStore, MemoryClusterLock, MemoryCursorStore, MemoryIdentityStore,
    MemoryRunStore, Principal, Source, SourceChain, SyncConfig, SyncOrchestrator,
};

/// Hook run at the start of every `fetch` call.
pub type FetchHook = Arc<dyn Fn(TenantId) + Send + Sync>;

/// Scripted directory source.
///
/// Serves a fixed record list, filtered by kind and watermark, and can be
/// switched into failure modes.
pub struct ScriptedDirectory {
    name: String,
    incremental: bool,
    any_kind: bool,
    records: Mutex<Vec<RemoteRecord>>,
    behavior: AtomicUsize, // 0=Success, 1=Unavailable, 2=AuthenticationFailed
    delay: Mutex<Duration>,
    mapped: Vec<String>,
    hook: Mutex<Option<FetchHook>>,
    fetch_call_count: AtomicUsize,
    fetch_one_call_count: AtomicUsize,
    requested: Mutex<Vec<(PrincipalKind, Option<DateTime<Utc>>)>>,
}

impl ScriptedDirectory {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            incremental: true,
            any_kind: false,
            records: Mutex::new(Vec::new()),
            behavior: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            mapped: Vec::new(),
            hook: Mutex::new(None),
            fetch_call_count: AtomicUsize::new(0),
            fetch_one_call_count: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_records(self, records: Vec<RemoteRecord>) -> Self {
        self.set_records(records);
        self
    }

    /// Answer single lookups by identifier alone, whatever kind was asked.
    pub fn answering_any_kind(mut self) -> Self {
        self.any_kind = true;
        self
    }

    pub fn without_incremental(mut self) -> Self {
        self.incremental = false;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn with_mapped_attributes(mut self, names: &[&str]) -> Self {
        self.mapped = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    pub fn on_fetch(&self, hook: FetchHook) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    pub fn set_records(&self, records: Vec<RemoteRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.behavior
            .store(usize::from(unavailable), Ordering::SeqCst);
    }

    pub fn set_auth_failure(&self) {
        self.behavior.store(2, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }

    pub fn fetch_one_calls(&self) -> usize {
        self.fetch_one_call_count.load(Ordering::SeqCst)
    }

    /// Kinds and watermarks of every `fetch` call, in call order.
    pub fn requested(&self) -> Vec<(PrincipalKind, Option<DateTime<Utc>>)> {
        self.requested.lock().unwrap().clone()
    }

    async fn pause_and_check(&self) -> SourceResult<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.behavior.load(Ordering::SeqCst) {
            0 => Ok(()),
            1 => Err(SourceError::unavailable(format!("{} is down", self.name))),
            _ => Err(SourceError::AuthenticationFailed),
        }
    }
}

#[async_trait]
impl DirectorySource for ScriptedDirectory {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn supports_incremental_query(&self) -> bool {
        self.incremental
    }

    async fn fetch(
        &self,
        tenant_id: TenantId,
        kind: PrincipalKind,
        since: Option<DateTime<Utc>>,
    ) -> SourceResult<Vec<RemoteRecord>> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push((kind, since));
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(tenant_id);
        }
        self.pause_and_check().await?;

        if since.is_some() && !self.incremental {
            return Err(SourceError::IncrementalNotSupported);
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| since.map_or(true, |s| r.last_modified_at_source > s))
            .cloned()
            .collect())
    }

    async fn fetch_one(
        &self,
        _tenant_id: TenantId,
        kind: PrincipalKind,
        identifier: &str,
    ) -> SourceResult<Option<RemoteRecord>> {
        self.fetch_one_call_count.fetch_add(1, Ordering::SeqCst);
        self.pause_and_check().await?;

        let key = PrincipalKey::new(kind, identifier);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                if self.any_kind {
                    r.key().identifier() == key.identifier()
                } else {
                    r.key() == key
                }
            })
            .cloned())
    }

    fn mapped_attributes(&self) -> Vec<String> {
        self.mapped.clone()
    }
}

/// Fixed timestamp in the past.
pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap()
}

/// Timestamp after any run started by the test.
pub fn future(hours: i64) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::hours(hours)
}

pub fn user(id: &str, day: u32) -> RemoteRecord {
    RemoteRecord::user(id, ts(day))
}

pub fn user_with_email(id: &str, email: &str, day: u32) -> RemoteRecord {
    RemoteRecord::user(id, ts(day)).with_attribute("email", email)
}

/// Configuration without retries, so failures resolve immediately.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        fetch_retry: RetryConfig::none(),
        fetch_timeout_secs: 30,
        ..SyncConfig::default()
    }
}

/// In-memory stores plus an orchestrator over a scripted chain.
pub struct Harness {
    pub tenant: TenantId,
    pub identities: Arc<MemoryIdentityStore>,
    pub cursors: Arc<MemoryCursorStore>,
    pub runs: Arc<MemoryRunStore>,
    pub lock: Arc<MemoryClusterLock>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub fn new(sources: Vec<(Source, Arc<ScriptedDirectory>)>, config: SyncConfig) -> Self {
        let identities = Arc::new(MemoryIdentityStore::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let runs = Arc::new(MemoryRunStore::new());
        let lock = Arc::new(MemoryClusterLock::new());
        let orchestrator = build_orchestrator(&identities, &cursors, &runs, &lock, sources, config);
        Self {
            tenant: TenantId::new(),
            identities,
            cursors,
            runs,
            lock,
            orchestrator,
        }
    }

    /// Another orchestrator (another "node") sharing stores and lock.
    pub fn peer(
        &self,
        sources: Vec<(Source, Arc<ScriptedDirectory>)>,
        config: SyncConfig,
    ) -> SyncOrchestrator {
        build_orchestrator(
            &self.identities,
            &self.cursors,
            &self.runs,
            &self.lock,
            sources,
            config,
        )
    }

    /// Live principal by kind and identifier.
    pub async fn principal(&self, kind: PrincipalKind, identifier: &str) -> Option<Principal> {
        self.identities
            .find_by_identifier(self.tenant, &PrincipalKey::new(kind, identifier))
            .await
            .unwrap()
    }

    pub async fn user(&self, identifier: &str) -> Option<Principal> {
        self.principal(PrincipalKind::User, identifier).await
    }

    /// Principal row whether tombstoned or not.
    pub async fn user_row(&self, identifier: &str) -> Option<Principal> {
        self.identities
            .get_any(self.tenant, &PrincipalKey::new(PrincipalKind::User, identifier))
            .await
    }

    pub async fn cursor(&self, source: &str) -> Option<DateTime<Utc>> {
        dirsync_engine::CursorStore::get(self.cursors.as_ref(), self.tenant, &SourceId::new(source))
            .await
            .unwrap()
    }
}

fn build_orchestrator(
    identities: &Arc<MemoryIdentityStore>,
    cursors: &Arc<MemoryCursorStore>,
    runs: &Arc<MemoryRunStore>,
    lock: &Arc<MemoryClusterLock>,
    sources: Vec<(Source, Arc<ScriptedDirectory>)>,
    config: SyncConfig,
) -> SyncOrchestrator {
    let links = sources
        .into_iter()
        .map(|(source, adapter)| ChainLink::new(source, adapter))
        .collect();
    SyncOrchestrator::new(
        SourceChain::new(links).unwrap(),
        identities.clone(),
        cursors.clone(),
        runs.clone(),
        lock.clone(),
        config,
    )
    .unwrap()
}

/// Scripted directory wrapped for sharing.
pub fn directory(name: &str, records: Vec<RemoteRecord>) -> Arc<ScriptedDirectory> {
    Arc::new(ScriptedDirectory::new(name).with_records(records))
}
