//! Directory source adapter trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dirsync_core::{PrincipalKind, TenantId};

use crate::error::SourceResult;
use crate::record::RemoteRecord;

/// Contract implemented by every registry in a source chain.
///
/// One adapter instance serves one source. The engine decides the order in
/// which batches are applied; adapters only answer queries.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Get the display name for this source instance.
    fn display_name(&self) -> &str;

    /// Whether the adapter can answer "modified since" queries.
    ///
    /// Adapters returning `false` must reject `fetch` calls with a
    /// watermark with [`SourceError::IncrementalNotSupported`](crate::SourceError).
    fn supports_incremental_query(&self) -> bool;

    /// Fetch records of one kind.
    ///
    /// With `since = None` the adapter returns its complete dataset for the
    /// kind; otherwise only records modified strictly after `since`.
    async fn fetch(
        &self,
        tenant_id: TenantId,
        kind: PrincipalKind,
        since: Option<DateTime<Utc>>,
    ) -> SourceResult<Vec<RemoteRecord>>;

    /// Fetch a single record by identifier, for on-demand synchronization.
    async fn fetch_one(
        &self,
        tenant_id: TenantId,
        kind: PrincipalKind,
        identifier: &str,
    ) -> SourceResult<Option<RemoteRecord>>;

    /// Names of the local attributes this source maps.
    fn mapped_attributes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lightweight health check.
    fn is_healthy(&self) -> bool {
        true
    }
}
