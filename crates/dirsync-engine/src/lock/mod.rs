//! Cluster lock: distributed mutual exclusion keyed by (tenant, task) with
//! a lease.
//!
//! A holder must renew its lease before the TTL runs out; a lease that is
//! not renewed expires and can be taken by another node. The
//! [`LeaseKeeper`] renews in the background and reports loss.

pub mod keeper;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use dirsync_core::TenantId;

use crate::error::LockResult;

pub use keeper::LeaseKeeper;
pub use memory::MemoryClusterLock;

/// Task name used for directory synchronization locks.
pub const SYNC_TASK: &str = "directory-sync";

/// Key of a cluster lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// Tenant the lock is scoped to.
    pub tenant_id: TenantId,
    /// Task name.
    pub task: String,
}

impl LockKey {
    /// Create a key.
    #[must_use]
    pub fn new(tenant_id: TenantId, task: impl Into<String>) -> Self {
        Self {
            tenant_id,
            task: task.into(),
        }
    }

    /// Key of the synchronization lock of a tenant.
    #[must_use]
    pub fn sync(tenant_id: TenantId) -> Self {
        Self::new(tenant_id, SYNC_TASK)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.task)
    }
}

/// Proof of holding a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Locked key.
    pub key: LockKey,
    /// Token identifying this holder.
    pub token: Uuid,
    /// Lease duration.
    pub ttl: Duration,
}

impl LockHandle {
    /// Create a handle with a fresh token.
    #[must_use]
    pub fn new(key: LockKey, ttl: Duration) -> Self {
        Self {
            key,
            token: Uuid::new_v4(),
            ttl,
        }
    }

    /// How often the lease should be renewed.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        self.ttl / 2
    }
}

/// Result of an acquisition attempt that reached the lock service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The lease is ours.
    Acquired(LockHandle),
    /// Another holder has a live lease.
    AlreadyHeld,
}

/// Distributed mutual exclusion with leases.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Try to take the lease on `key` for `ttl`.
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> LockResult<LockAcquisition>;

    /// Extend the lease by its TTL. Returns `false` when the lease is no
    /// longer held by `handle`.
    async fn renew(&self, handle: &LockHandle) -> LockResult<bool>;

    /// Give the lease up. Releasing a lease no longer held is a no-op.
    async fn release(&self, handle: &LockHandle) -> LockResult<()>;
}

/// Try to take a lease up to `attempts` times, waiting `delay` between
/// attempts that found the lease held.
pub async fn acquire_with_retry(
    lock: &dyn ClusterLock,
    key: &LockKey,
    ttl: Duration,
    attempts: u32,
    delay: Duration,
) -> LockResult<LockAcquisition> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match lock.try_acquire(key, ttl).await? {
            LockAcquisition::Acquired(handle) => return Ok(LockAcquisition::Acquired(handle)),
            LockAcquisition::AlreadyHeld if attempt < attempts => {
                debug!(lock = %key, attempt, attempts, "Lock held elsewhere, retrying");
                tokio::time::sleep(delay).await;
            }
            LockAcquisition::AlreadyHeld => {}
        }
    }
    Ok(LockAcquisition::AlreadyHeld)
}
