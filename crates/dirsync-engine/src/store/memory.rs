//! In-memory stores.
//!
//! Used by tests and by embedders that keep identities elsewhere. The
//! identity and cursor stores expose fault toggles so failure handling can
//! be exercised without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::instrument;

use dirsync_core::{PrincipalKey, RunId, SourceId, TenantId};

use super::{CursorStore, IdentityStore, RunStore};
use crate::error::{StoreError, StoreResult};
use crate::principal::Principal;
use crate::run::SyncRun;

/// In-memory identity store.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    rows: RwLock<HashMap<(TenantId, PrincipalKey), Principal>>,
    unavailable: AtomicBool,
    read_only: AtomicBool,
    failing_keys: RwLock<HashSet<PrincipalKey>>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a total outage: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Report the store as read-only.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Make every write touching `key` fail.
    pub async fn fail_writes_for(&self, key: PrincipalKey) {
        self.failing_keys.write().await.insert(key);
    }

    /// Clear injected write failures.
    pub async fn clear_write_failures(&self) {
        self.failing_keys.write().await.clear();
    }

    /// Every row of a tenant, tombstoned ones included, sorted by key.
    pub async fn snapshot(&self, tenant_id: TenantId) -> Vec<Principal> {
        let rows = self.rows.read().await;
        let mut principals: Vec<Principal> = rows
            .iter()
            .filter(|((tenant, _), _)| *tenant == tenant_id)
            .map(|(_, principal)| principal.clone())
            .collect();
        principals.sort_by_key(Principal::key);
        principals
    }

    /// Row for a key, tombstoned or not.
    pub async fn get_any(&self, tenant_id: TenantId, key: &PrincipalKey) -> Option<Principal> {
        self.rows.read().await.get(&(tenant_id, key.clone())).cloned()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("identity store is offline"));
        }
        Ok(())
    }

    async fn check_writable(&self, key: &PrincipalKey) -> StoreResult<()> {
        self.check_available()?;
        if self.failing_keys.read().await.contains(key) {
            return Err(StoreError::write(format!("write rejected for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_identifier(
        &self,
        tenant_id: TenantId,
        key: &PrincipalKey,
    ) -> StoreResult<Option<Principal>> {
        self.check_available()?;
        Ok(self
            .rows
            .read()
            .await
            .get(&(tenant_id, key.clone()))
            .filter(|principal| !principal.tombstoned)
            .cloned())
    }

    #[instrument(skip(self, principal), fields(key = %principal.key()))]
    async fn upsert(&self, principal: &Principal) -> StoreResult<()> {
        let key = principal.key();
        self.check_writable(&key).await?;
        let mut row = principal.clone();
        row.tombstoned = false;
        self.rows
            .write()
            .await
            .insert((principal.tenant_id, key), row);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn tombstone(&self, tenant_id: TenantId, key: &PrincipalKey) -> StoreResult<bool> {
        self.check_writable(key).await?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&(tenant_id, key.clone())) {
            Some(principal) if !principal.tombstoned => {
                principal.tombstoned = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_owned_by(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
    ) -> StoreResult<Vec<Principal>> {
        self.check_available()?;
        let rows = self.rows.read().await;
        let mut owned: Vec<Principal> = rows
            .iter()
            .filter(|((tenant, _), principal)| {
                *tenant == tenant_id && !principal.tombstoned && principal.is_owned_by(source_id)
            })
            .map(|(_, principal)| principal.clone())
            .collect();
        owned.sort_by_key(Principal::key);
        Ok(owned)
    }

    async fn is_read_only(&self) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.read_only.load(Ordering::SeqCst))
    }
}

/// In-memory cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<HashMap<(TenantId, SourceId), DateTime<Utc>>>,
    unreadable: RwLock<HashSet<SourceId>>,
}

impl MemoryCursorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads of `source_id`'s cursor fail.
    pub async fn fail_reads_for(&self, source_id: SourceId) {
        self.unreadable.write().await.insert(source_id);
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        if self.unreadable.read().await.contains(source_id) {
            return Err(StoreError::write(format!("cursor row for '{source_id}' unreadable")));
        }
        Ok(self
            .cursors
            .read()
            .await
            .get(&(tenant_id, source_id.clone()))
            .copied())
    }

    async fn set(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
        watermark: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.cursors
            .write()
            .await
            .insert((tenant_id, source_id.clone()), watermark);
        Ok(())
    }

    async fn reset(&self, tenant_id: TenantId, source_id: &SourceId) -> StoreResult<()> {
        self.cursors
            .write()
            .await
            .remove(&(tenant_id, source_id.clone()));
        Ok(())
    }
}

/// In-memory run store. Keeps runs in creation order.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<Vec<SyncRun>>,
}

impl MemoryRunStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All runs of a tenant in creation order.
    pub async fn list(&self, tenant_id: TenantId) -> Vec<SyncRun> {
        self.runs
            .read()
            .await
            .iter()
            .filter(|run| run.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, run: &SyncRun) -> StoreResult<()> {
        let mut runs = self.runs.write().await;
        if runs.iter().any(|existing| existing.id == run.id) {
            return Err(StoreError::write(format!("run {} already exists", run.id)));
        }
        runs.push(run.clone());
        Ok(())
    }

    async fn update(&self, run: &SyncRun) -> StoreResult<()> {
        let mut runs = self.runs.write().await;
        match runs.iter_mut().find(|existing| existing.id == run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(StoreError::write(format!("run {} not found", run.id))),
        }
    }

    async fn get(&self, tenant_id: TenantId, run_id: RunId) -> StoreResult<Option<SyncRun>> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .find(|run| run.id == run_id && run.tenant_id == tenant_id)
            .cloned())
    }

    async fn latest(&self, tenant_id: TenantId) -> StoreResult<Option<SyncRun>> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .rev()
            .find(|run| run.tenant_id == tenant_id)
            .cloned())
    }
}
