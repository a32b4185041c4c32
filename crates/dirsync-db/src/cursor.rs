//! PostgreSQL cursor store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use dirsync_core::{SourceId, TenantId};
use dirsync_engine::{CursorStore, StoreResult};

use crate::error::store_error;

/// Cursor store backed by the `dirsync_cursors` table. A reset cursor has
/// no row.
#[derive(Debug, Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            r"
            SELECT watermark FROM dirsync_cursors
            WHERE tenant_id = $1 AND source_id = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(source_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    #[instrument(skip(self))]
    async fn set(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
        watermark: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO dirsync_cursors (tenant_id, source_id, watermark)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, source_id) DO UPDATE SET
                watermark = EXCLUDED.watermark,
                updated_at = NOW()
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(source_id.as_str())
        .bind(watermark)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset(&self, tenant_id: TenantId, source_id: &SourceId) -> StoreResult<()> {
        sqlx::query(
            r"
            DELETE FROM dirsync_cursors
            WHERE tenant_id = $1 AND source_id = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(source_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }
}
