//! PostgreSQL run store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::instrument;
use uuid::Uuid;

use dirsync_core::{RunId, SourceId, TenantId};
use dirsync_engine::{
    RunStatistics, RunState, RunStore, SourceStatus, StoreError, StoreResult, SyncMode, SyncRun,
};

use crate::error::store_error;

const SELECT_RUN: &str = r"
    SELECT id, tenant_id, mode, state, started_at, completed_at, per_source_status,
           source_errors, deletions_detected, reason, statistics
    FROM dirsync_runs
";

/// Run store backed by the `dirsync_runs` table.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn create(&self, run: &SyncRun) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO dirsync_runs (
                id, tenant_id, mode, state, started_at, completed_at, per_source_status,
                source_errors, deletions_detected, reason, statistics
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(run.id.as_uuid())
        .bind(run.tenant_id.as_uuid())
        .bind(Json(&run.mode))
        .bind(run.state.as_str())
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(Json(&run.per_source_status))
        .bind(Json(&run.source_errors))
        .bind(run.deletions_detected)
        .bind(run.reason.as_deref())
        .bind(Json(&run.statistics))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, state = %run.state))]
    async fn update(&self, run: &SyncRun) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE dirsync_runs
            SET state = $3,
                completed_at = $4,
                per_source_status = $5,
                source_errors = $6,
                deletions_detected = $7,
                reason = $8,
                statistics = $9,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(run.id.as_uuid())
        .bind(run.tenant_id.as_uuid())
        .bind(run.state.as_str())
        .bind(run.completed_at)
        .bind(Json(&run.per_source_status))
        .bind(Json(&run.source_errors))
        .bind(run.deletions_detected)
        .bind(run.reason.as_deref())
        .bind(Json(&run.statistics))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::write(format!("run {} not found", run.id)));
        }
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, run_id: RunId) -> StoreResult<Option<SyncRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "{SELECT_RUN} WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(run_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(RunRow::into_run).transpose()
    }

    async fn latest(&self, tenant_id: TenantId) -> StoreResult<Option<SyncRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "{SELECT_RUN} WHERE tenant_id = $1 ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(RunRow::into_run).transpose()
    }
}

/// Database row for a run.
#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    tenant_id: Uuid,
    mode: Json<SyncMode>,
    state: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    per_source_status: Json<BTreeMap<SourceId, SourceStatus>>,
    source_errors: Json<BTreeMap<SourceId, String>>,
    deletions_detected: bool,
    reason: Option<String>,
    statistics: Json<RunStatistics>,
}

impl RunRow {
    fn into_run(self) -> StoreResult<SyncRun> {
        let state: RunState = self.state.parse().map_err(StoreError::invalid_row)?;
        Ok(SyncRun {
            id: RunId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            mode: self.mode.0,
            state,
            started_at: self.started_at,
            completed_at: self.completed_at,
            per_source_status: self.per_source_status.0,
            source_errors: self.source_errors.0,
            deletions_detected: self.deletions_detected,
            reason: self.reason,
            statistics: self.statistics.0,
        })
    }
}
