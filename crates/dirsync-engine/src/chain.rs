//! Source chain: the ordered set of directory sources synchronized into the
//! identity store.
//!
//! Every decision the engine takes is made against the explicit
//! [`Source::precedence`], never against list position. Configuration lists
//! are turned into precedences once, in [`SourceChain::from_configs`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dirsync_core::SourceId;
use dirsync_directory::DirectorySource;

use crate::error::{SyncError, SyncResult};

/// A directory source as seen by the engine. Immutable during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Source id.
    pub id: SourceId,
    /// Position in the chain, 0-based; lower means higher priority.
    pub precedence: u32,
    /// Whether "modified since" queries can be used.
    pub supports_incremental_query: bool,
    /// Inactive sources are skipped by every run.
    pub active: bool,
}

impl Source {
    /// Create an active source supporting incremental queries.
    #[must_use]
    pub fn new(id: impl Into<SourceId>, precedence: u32) -> Self {
        Self {
            id: id.into(),
            precedence,
            supports_incremental_query: true,
            active: true,
        }
    }

    /// Set incremental query support.
    #[must_use]
    pub fn with_incremental_query(mut self, supported: bool) -> Self {
        self.supports_incremental_query = supported;
        self
    }

    /// Mark the source inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether this source outranks a source with the given precedence.
    #[must_use]
    pub fn outranks(&self, precedence: u32) -> bool {
        self.precedence < precedence
    }
}

/// Configured entry of the source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source id; must match a registered adapter.
    pub id: SourceId,
    /// Allow incremental queries when the adapter supports them.
    #[serde(default = "default_true")]
    pub supports_incremental_query: bool,
    /// Whether the source takes part in synchronization.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Create an active configuration entry.
    #[must_use]
    pub fn new(id: impl Into<SourceId>) -> Self {
        Self {
            id: id.into(),
            supports_incremental_query: true,
            active: true,
        }
    }
}

/// A source together with the adapter that answers its queries.
#[derive(Clone)]
pub struct ChainLink {
    /// Source metadata.
    pub source: Source,
    /// Adapter for the source.
    pub adapter: Arc<dyn DirectorySource>,
}

impl ChainLink {
    /// Create a link.
    #[must_use]
    pub fn new(source: Source, adapter: Arc<dyn DirectorySource>) -> Self {
        Self { source, adapter }
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLink")
            .field("source", &self.source)
            .field("adapter", &self.adapter.display_name())
            .finish()
    }
}

/// Sources ordered by ascending precedence.
#[derive(Debug, Clone, Default)]
pub struct SourceChain {
    links: Vec<ChainLink>,
}

impl SourceChain {
    /// Build a chain from links given in any order.
    ///
    /// Source ids must be valid and unique, and no two sources may share a
    /// precedence.
    pub fn new(mut links: Vec<ChainLink>) -> SyncResult<Self> {
        let mut ids = HashSet::new();
        let mut precedences = HashSet::new();
        for link in &links {
            if !link.source.id.is_valid() {
                return Err(SyncError::invalid_chain("source id must not be blank"));
            }
            if !ids.insert(link.source.id.clone()) {
                return Err(SyncError::invalid_chain(format!(
                    "duplicate source id '{}'",
                    link.source.id
                )));
            }
            if !precedences.insert(link.source.precedence) {
                return Err(SyncError::invalid_chain(format!(
                    "duplicate precedence {} (source '{}')",
                    link.source.precedence, link.source.id
                )));
            }
        }

        links.sort_by_key(|link| link.source.precedence);
        Ok(Self { links })
    }

    /// Build a chain from configuration, assigning precedence by position.
    ///
    /// Incremental queries are used only when both the configuration and
    /// the adapter allow them.
    pub fn from_configs(
        configs: &[SourceConfig],
        adapters: &HashMap<SourceId, Arc<dyn DirectorySource>>,
    ) -> SyncResult<Self> {
        let mut links = Vec::with_capacity(configs.len());
        for (position, config) in configs.iter().enumerate() {
            let adapter = adapters.get(&config.id).ok_or_else(|| {
                SyncError::configuration(format!("no adapter registered for source '{}'", config.id))
            })?;
            let precedence = u32::try_from(position)
                .map_err(|_| SyncError::invalid_chain("too many sources"))?;

            let mut source = Source::new(config.id.clone(), precedence)
                .with_incremental_query(
                    config.supports_incremental_query && adapter.supports_incremental_query(),
                );
            source.active = config.active;
            links.push(ChainLink::new(source, adapter.clone()));
        }
        Self::new(links)
    }

    /// Links in ascending precedence.
    #[must_use]
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Sources in ascending precedence.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.links.iter().map(|link| &link.source)
    }

    /// Look up a link by source id.
    #[must_use]
    pub fn get(&self, id: &SourceId) -> Option<&ChainLink> {
        self.links.iter().find(|link| &link.source.id == id)
    }

    /// Precedence of a source, or `None` when it is not in the chain.
    #[must_use]
    pub fn precedence_of(&self, id: &SourceId) -> Option<u32> {
        self.get(id).map(|link| link.source.precedence)
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the chain has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use dirsync_core::{PrincipalKind, TenantId};
    use dirsync_directory::{RemoteRecord, SourceResult};

    struct NullDirectory {
        incremental: bool,
    }

    #[async_trait]
    impl DirectorySource for NullDirectory {
        fn display_name(&self) -> &str {
            "null"
        }

        fn supports_incremental_query(&self) -> bool {
            self.incremental
        }

        async fn fetch(
            &self,
            _tenant_id: TenantId,
            _kind: PrincipalKind,
            _since: Option<DateTime<Utc>>,
        ) -> SourceResult<Vec<RemoteRecord>> {
            Ok(Vec::new())
        }

        async fn fetch_one(
            &self,
            _tenant_id: TenantId,
            _kind: PrincipalKind,
            _identifier: &str,
        ) -> SourceResult<Option<RemoteRecord>> {
            Ok(None)
        }
    }

    fn link(id: &str, precedence: u32) -> ChainLink {
        ChainLink::new(
            Source::new(id, precedence),
            Arc::new(NullDirectory { incremental: true }),
        )
    }

    #[test]
    fn test_chain_sorted_by_precedence() {
        let chain = SourceChain::new(vec![link("b", 1), link("c", 2), link("a", 0)]).unwrap();
        let ids: Vec<&str> = chain.sources().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(chain.precedence_of(&SourceId::new("c")), Some(2));
        assert_eq!(chain.precedence_of(&SourceId::new("z")), None);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = SourceChain::new(vec![link("a", 0), link("a", 1)]);
        assert!(matches!(result, Err(SyncError::InvalidChain { .. })));
    }

    #[test]
    fn test_duplicate_precedence_rejected() {
        let result = SourceChain::new(vec![link("a", 0), link("b", 0)]);
        assert!(matches!(result, Err(SyncError::InvalidChain { .. })));
    }

    #[test]
    fn test_blank_id_rejected() {
        let result = SourceChain::new(vec![link(" ", 0)]);
        assert!(matches!(result, Err(SyncError::InvalidChain { .. })));
    }

    #[test]
    fn test_from_configs_assigns_position_precedence() {
        let mut adapters: HashMap<SourceId, Arc<dyn DirectorySource>> = HashMap::new();
        adapters.insert("ad".into(), Arc::new(NullDirectory { incremental: true }));
        adapters.insert("ldap".into(), Arc::new(NullDirectory { incremental: false }));

        let mut inactive = SourceConfig::new("ad");
        inactive.active = false;
        let configs = vec![SourceConfig::new("ldap"), inactive];

        let chain = SourceChain::from_configs(&configs, &adapters).unwrap();
        let sources: Vec<&Source> = chain.sources().collect();
        assert_eq!(sources[0].id.as_str(), "ldap");
        assert_eq!(sources[0].precedence, 0);
        assert!(!sources[0].supports_incremental_query);
        assert_eq!(sources[1].precedence, 1);
        assert!(!sources[1].active);
    }

    #[test]
    fn test_from_configs_missing_adapter() {
        let adapters = HashMap::new();
        let result = SourceChain::from_configs(&[SourceConfig::new("ldap")], &adapters);
        assert!(matches!(result, Err(SyncError::Configuration { .. })));
    }

    #[test]
    fn test_outranks() {
        let source = Source::new("a", 0);
        assert!(source.outranks(1));
        assert!(!source.outranks(0));
    }
}
