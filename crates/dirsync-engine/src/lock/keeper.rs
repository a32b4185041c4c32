//! Background lease renewal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ClusterLock, LockHandle};
use crate::error::{SyncError, SyncResult};

/// Keeps a lease alive for the duration of a run.
///
/// Renews every TTL/2 on a background task. A renewal that errors is retried
/// every TTL/8 while the last confirmed lease has time left; a refused
/// renewal, or an error too close to expiry, marks the lease lost for good.
/// The run notices at its next checkpoint.
pub struct LeaseKeeper {
    lock: Arc<dyn ClusterLock>,
    handle: LockHandle,
    lost: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Start renewing `handle`.
    #[must_use]
    pub fn spawn(lock: Arc<dyn ClusterLock>, handle: LockHandle) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(renew_loop(lock.clone(), handle.clone(), lost.clone()));
        Self {
            lock,
            handle,
            lost,
            task,
        }
    }

    /// The held lease.
    #[must_use]
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    /// Whether a renewal has failed.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Cheap checkpoint: fail if the background renewal saw the lease go.
    pub fn ensure_held(&self) -> SyncResult<()> {
        if self.is_lost() {
            return Err(SyncError::LockLost {
                tenant_id: self.handle.key.tenant_id,
            });
        }
        Ok(())
    }

    /// Strong checkpoint: renew now and fail unless the lease is still ours.
    pub async fn confirm(&self) -> SyncResult<()> {
        self.ensure_held()?;
        match self.lock.renew(&self.handle).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.lost.store(true, Ordering::SeqCst);
                warn!(lock = %self.handle.key, "Lease no longer held");
                Err(SyncError::LockLost {
                    tenant_id: self.handle.key.tenant_id,
                })
            }
            Err(e) => {
                self.lost.store(true, Ordering::SeqCst);
                warn!(lock = %self.handle.key, error = %e, "Lease renewal failed");
                Err(SyncError::LockLost {
                    tenant_id: self.handle.key.tenant_id,
                })
            }
        }
    }

    /// Stop renewing and give the lease up.
    pub async fn release(self) {
        self.task.abort();
        if self.is_lost() {
            return;
        }
        if let Err(e) = self.lock.release(&self.handle).await {
            warn!(lock = %self.handle.key, error = %e, "Failed to release lease");
        } else {
            debug!(lock = %self.handle.key, "Lease released");
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn renew_loop(lock: Arc<dyn ClusterLock>, handle: LockHandle, lost: Arc<AtomicBool>) {
    let interval = handle.renew_interval();
    let retry_delay = interval / 4;
    let mut expires_at = Instant::now() + handle.ttl;
    let mut delay = interval;
    loop {
        tokio::time::sleep(delay).await;
        let attempted_at = Instant::now();
        match lock.renew(&handle).await {
            Ok(true) => {
                debug!(lock = %handle.key, "Lease renewed");
                expires_at = attempted_at + handle.ttl;
                delay = interval;
            }
            Ok(false) => {
                warn!(lock = %handle.key, "Lease lost during renewal");
                lost.store(true, Ordering::SeqCst);
                return;
            }
            Err(e) if Instant::now() + retry_delay < expires_at => {
                warn!(
                    lock = %handle.key,
                    error = %e,
                    retry_in_secs = retry_delay.as_secs(),
                    "Lease renewal failed, retrying"
                );
                delay = retry_delay;
            }
            Err(e) => {
                warn!(lock = %handle.key, error = %e, "Lease renewal failed before expiry, giving up");
                lost.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}
