//! PostgreSQL identity store.
//!
//! Rows are keyed by (tenant, kind, folded identifier); the identifier as
//! reported by the owning source is kept alongside for display.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use dirsync_core::{PrincipalKey, PrincipalKind, PrincipalRef, SourceId, TenantId};
use dirsync_directory::AttributeMap;
use dirsync_engine::{IdentityStore, Principal, StoreError, StoreResult};

use crate::error::store_error;

/// Identity store backed by the `dirsync_principals` table.
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_identifier(
        &self,
        tenant_id: TenantId,
        key: &PrincipalKey,
    ) -> StoreResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r"
            SELECT tenant_id, kind, identifier, attributes, members,
                   owner_source_id, last_modified_at_source, tombstoned
            FROM dirsync_principals
            WHERE tenant_id = $1 AND kind = $2 AND identifier_key = $3
              AND NOT tombstoned
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(key.kind.as_str())
        .bind(key.identifier())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(PrincipalRow::into_principal).transpose()
    }

    #[instrument(skip(self, principal), fields(key = %principal.key()))]
    async fn upsert(&self, principal: &Principal) -> StoreResult<()> {
        let key = principal.key();
        sqlx::query(
            r"
            INSERT INTO dirsync_principals (
                tenant_id, kind, identifier_key, identifier, attributes, members,
                owner_source_id, last_modified_at_source, tombstoned
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false)
            ON CONFLICT (tenant_id, kind, identifier_key) DO UPDATE SET
                identifier = EXCLUDED.identifier,
                attributes = EXCLUDED.attributes,
                members = EXCLUDED.members,
                owner_source_id = EXCLUDED.owner_source_id,
                last_modified_at_source = EXCLUDED.last_modified_at_source,
                tombstoned = false,
                updated_at = NOW()
            ",
        )
        .bind(principal.tenant_id.as_uuid())
        .bind(key.kind.as_str())
        .bind(key.identifier())
        .bind(&principal.identifier)
        .bind(Json(&principal.attributes))
        .bind(Json(&principal.members))
        .bind(principal.owner_source_id.as_str())
        .bind(principal.last_modified_at_source)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn tombstone(&self, tenant_id: TenantId, key: &PrincipalKey) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE dirsync_principals
            SET tombstoned = true, updated_at = NOW()
            WHERE tenant_id = $1 AND kind = $2 AND identifier_key = $3
              AND NOT tombstoned
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(key.kind.as_str())
        .bind(key.identifier())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_owned_by(
        &self,
        tenant_id: TenantId,
        source_id: &SourceId,
    ) -> StoreResult<Vec<Principal>> {
        let rows = sqlx::query_as::<_, PrincipalRow>(
            r"
            SELECT tenant_id, kind, identifier, attributes, members,
                   owner_source_id, last_modified_at_source, tombstoned
            FROM dirsync_principals
            WHERE tenant_id = $1 AND owner_source_id = $2 AND NOT tombstoned
            ORDER BY kind, identifier_key
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(source_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(PrincipalRow::into_principal).collect()
    }

    async fn is_read_only(&self) -> StoreResult<bool> {
        let read_only: bool =
            sqlx::query_scalar("SELECT current_setting('transaction_read_only') = 'on'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(read_only)
    }
}

/// Database row for a principal.
#[derive(Debug, sqlx::FromRow)]
struct PrincipalRow {
    tenant_id: Uuid,
    kind: String,
    identifier: String,
    attributes: Json<AttributeMap>,
    members: Json<Vec<PrincipalRef>>,
    owner_source_id: String,
    last_modified_at_source: DateTime<Utc>,
    tombstoned: bool,
}

impl PrincipalRow {
    fn into_principal(self) -> StoreResult<Principal> {
        let kind: PrincipalKind = self.kind.parse().map_err(StoreError::invalid_row)?;
        Ok(Principal {
            tenant_id: TenantId::from_uuid(self.tenant_id),
            kind,
            identifier: self.identifier,
            attributes: self.attributes.0,
            members: self.members.0,
            owner_source_id: SourceId::new(self.owner_source_id),
            last_modified_at_source: self.last_modified_at_source,
            tombstoned: self.tombstoned,
        })
    }
}
