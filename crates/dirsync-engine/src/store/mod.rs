//! Persistence contracts used by the engine.
//!
//! The engine needs only per-row atomicity from these stores. In-memory
//! implementations live in [`memory`]; PostgreSQL implementations live in
//! the `dirsync-db` crate.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dirsync_core::{PrincipalKey, RunId, SourceId, TenantId};

use crate::error::StoreResult;
use crate::principal::Principal;
use crate::run::SyncRun;

pub use memory::{MemoryCursorStore, MemoryIdentityStore, MemoryRunStore};

/// Local durable set of principals.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find the non-tombstoned principal with the given key.
    async fn find_by_identifier(
        &self,
        tenant_id: TenantId,
        key: &PrincipalKey,
    ) -> StoreResult<Option<Principal>>;

    /// Insert or replace the principal with the same key, clearing any
    /// tombstone.
    async fn upsert(&self, principal: &Principal) -> StoreResult<()>;

    /// Tombstone a principal. Returns `false` when there was nothing live to
    /// tombstone.
    async fn tombstone(&self, tenant_id: TenantId, key: &PrincipalKey) -> StoreResult<bool>;

    /// All non-tombstoned principals owned by a source.
    async fn list_owned_by(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
    ) -> StoreResult<Vec<Principal>>;

    /// Whether the store currently refuses writes.
    async fn is_read_only(&self) -> StoreResult<bool> {
        Ok(false)
    }
}

/// Per (tenant, source) watermark of the last applied batch.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Stored watermark, `None` when the cursor was never written or reset.
    async fn get(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Store a watermark, creating the cursor row if needed.
    async fn set(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
        watermark: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Reset a cursor to the beginning of time.
    async fn reset(&self, tenant_id: TenantId, source_id: &SourceId) -> StoreResult<()>;
}

/// Sync run bookkeeping.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Record a new run.
    async fn create(&self, run: &SyncRun) -> StoreResult<()>;

    /// Replace a recorded run.
    async fn update(&self, run: &SyncRun) -> StoreResult<()>;

    /// Get a run by id.
    async fn get(&self, tenant_id: TenantId, run_id: RunId) -> StoreResult<Option<SyncRun>>;

    /// Most recently created run of a tenant.
    async fn latest(&self, tenant_id: TenantId) -> StoreResult<Option<SyncRun>>;
}
