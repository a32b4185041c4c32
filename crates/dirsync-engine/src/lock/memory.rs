//! In-process cluster lock.
//!
//! Leases expire on the tokio clock, so paused-time tests can drive expiry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{ClusterLock, LockAcquisition, LockHandle, LockKey};
use crate::error::{LockError, LockResult};

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

/// Cluster lock for a single process.
#[derive(Debug, Default)]
pub struct MemoryClusterLock {
    leases: Mutex<HashMap<LockKey, Lease>>,
    unavailable: AtomicBool,
}

impl MemoryClusterLock {
    /// Create a lock with no leases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lock service outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop the lease on `key` regardless of holder, as if it had expired
    /// and been taken over.
    pub async fn revoke(&self, key: &LockKey) {
        self.leases.lock().await.remove(key);
    }

    /// Whether `key` has a live lease.
    pub async fn is_held(&self, key: &LockKey) -> bool {
        self.leases
            .lock()
            .await
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }

    fn check_available(&self) -> LockResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::backend("lock service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterLock for MemoryClusterLock {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> LockResult<LockAcquisition> {
        self.check_available()?;
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        if let Some(lease) = leases.get(key) {
            if lease.expires_at > now {
                return Ok(LockAcquisition::AlreadyHeld);
            }
            debug!(lock = %key, "Taking over expired lease");
        }

        let handle = LockHandle::new(key.clone(), ttl);
        leases.insert(
            key.clone(),
            Lease {
                token: handle.token,
                expires_at: now + ttl,
            },
        );
        Ok(LockAcquisition::Acquired(handle))
    }

    async fn renew(&self, handle: &LockHandle) -> LockResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        match leases.get_mut(&handle.key) {
            Some(lease) if lease.token == handle.token && lease.expires_at > now => {
                lease.expires_at = now + handle.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, handle: &LockHandle) -> LockResult<()> {
        self.check_available()?;
        let mut leases = self.leases.lock().await;
        if leases
            .get(&handle.key)
            .is_some_and(|lease| lease.token == handle.token)
        {
            leases.remove(&handle.key);
        }
        Ok(())
    }
}
