//! Run statistics.
//!
//! Counters are kept per source and stored on the [`SyncRun`](crate::SyncRun).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use dirsync_core::SourceId;

/// Counters for one source within one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatistics {
    /// Records returned by the source.
    #[serde(default)]
    pub fetched: u32,
    /// Principals created.
    #[serde(default)]
    pub created: u32,
    /// Principals already owned by the source and overwritten.
    #[serde(default)]
    pub updated: u32,
    /// Principals taken over from a lower-priority source.
    #[serde(default)]
    pub taken_over: u32,
    /// Principals taken over from a source no longer in the chain.
    #[serde(default)]
    pub rezoned: u32,
    /// Records ignored because a higher-priority source owns the identity.
    #[serde(default)]
    pub collisions_ignored: u32,
    /// Records rejected by validation.
    #[serde(default)]
    pub invalid_records: u32,
    /// Group membership edges dropped to break cycles.
    #[serde(default)]
    pub memberships_pruned: u32,
    /// Principals tombstoned by deletion detection.
    #[serde(default)]
    pub tombstoned: u32,
    /// Deletion candidates kept because deletions are disabled.
    #[serde(default)]
    pub deletions_suppressed: u32,
}

impl SourceStatistics {
    /// Create new empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Principals written by this source.
    #[must_use]
    pub fn written(&self) -> u32 {
        self.created + self.updated + self.taken_over + self.rezoned
    }

    /// Merge with another statistics instance.
    pub fn merge(&mut self, other: &SourceStatistics) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.taken_over += other.taken_over;
        self.rezoned += other.rezoned;
        self.collisions_ignored += other.collisions_ignored;
        self.invalid_records += other.invalid_records;
        self.memberships_pruned += other.memberships_pruned;
        self.tombstoned += other.tombstoned;
        self.deletions_suppressed += other.deletions_suppressed;
    }
}

/// Statistics for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Counters per source.
    #[serde(default)]
    pub per_source: BTreeMap<SourceId, SourceStatistics>,
    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunStatistics {
    /// Create new empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of one source, created on first use.
    pub fn source_mut(&mut self, source_id: &SourceId) -> &mut SourceStatistics {
        self.per_source.entry(source_id.clone()).or_default()
    }

    /// Counters of one source.
    #[must_use]
    pub fn source(&self, source_id: &SourceId) -> SourceStatistics {
        self.per_source.get(source_id).copied().unwrap_or_default()
    }

    /// Counters summed over all sources.
    #[must_use]
    pub fn totals(&self) -> SourceStatistics {
        let mut totals = SourceStatistics::new();
        for stats in self.per_source.values() {
            totals.merge(stats);
        }
        totals
    }
}
