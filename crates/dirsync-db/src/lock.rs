//! PostgreSQL cluster lock.
//!
//! One row per (tenant, task). A lease is taken by inserting the row, or by
//! overwriting a row whose lease has expired; both happen in one statement,
//! so two nodes can never hold the same live lease. Expiry is judged by the
//! database clock.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use dirsync_engine::{ClusterLock, LockAcquisition, LockHandle, LockKey, LockResult};

use crate::error::lock_error;

/// Cluster lock backed by the `dirsync_locks` table.
#[derive(Debug, Clone)]
pub struct PgClusterLock {
    pool: PgPool,
}

impl PgClusterLock {
    /// Create a lock over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClusterLock for PgClusterLock {
    #[instrument(skip(self), fields(lock = %key))]
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> LockResult<LockAcquisition> {
        let handle = LockHandle::new(key.clone(), ttl);
        let token: Option<Uuid> = sqlx::query_scalar(
            r"
            INSERT INTO dirsync_locks (tenant_id, task, token, acquired_at, expires_at)
            VALUES ($1, $2, $3, NOW(), NOW() + make_interval(secs => $4))
            ON CONFLICT (tenant_id, task) DO UPDATE SET
                token = EXCLUDED.token,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE dirsync_locks.expires_at <= NOW()
            RETURNING token
            ",
        )
        .bind(key.tenant_id.as_uuid())
        .bind(&key.task)
        .bind(handle.token)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(lock_error)?;

        match token {
            Some(token) if token == handle.token => {
                debug!("Lease acquired");
                Ok(LockAcquisition::Acquired(handle))
            }
            _ => Ok(LockAcquisition::AlreadyHeld),
        }
    }

    #[instrument(skip(self, handle), fields(lock = %handle.key))]
    async fn renew(&self, handle: &LockHandle) -> LockResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE dirsync_locks
            SET expires_at = NOW() + make_interval(secs => $4)
            WHERE tenant_id = $1 AND task = $2 AND token = $3
              AND expires_at > NOW()
            ",
        )
        .bind(handle.key.tenant_id.as_uuid())
        .bind(&handle.key.task)
        .bind(handle.token)
        .bind(handle.ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(lock_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, handle), fields(lock = %handle.key))]
    async fn release(&self, handle: &LockHandle) -> LockResult<()> {
        sqlx::query(
            r"
            DELETE FROM dirsync_locks
            WHERE tenant_id = $1 AND task = $2 AND token = $3
            ",
        )
        .bind(handle.key.tenant_id.as_uuid())
        .bind(&handle.key.task)
        .bind(handle.token)
        .execute(&self.pool)
        .await
        .map_err(lock_error)?;

        Ok(())
    }
}
