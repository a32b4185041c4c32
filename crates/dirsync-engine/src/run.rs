//! Sync runs: modes, per-source status and the run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use dirsync_core::{PrincipalKind, RunId, SourceId, TenantAware, TenantId};

use crate::chain::SourceChain;
use crate::error::{SyncError, SyncResult};
use crate::statistics::RunStatistics;

/// What a run synchronizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// Every source, complete datasets, with deletion detection.
    Full,
    /// Records modified since each source's cursor. Never deletes.
    Differential,
    /// One identity, looked up along the chain until the first hit.
    SingleIdentity {
        kind: PrincipalKind,
        identifier: String,
    },
}

impl SyncMode {
    /// Create a single-identity mode.
    #[must_use]
    pub fn single(kind: PrincipalKind, identifier: impl Into<String>) -> Self {
        SyncMode::SingleIdentity {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Differential => "differential",
            SyncMode::SingleIdentity { .. } => "single_identity",
        }
    }

    /// Check if this is a full run.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, SyncMode::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one source within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Fetched and applied completely.
    Ok,
    /// Fetch or apply failed; cursor left untouched.
    Failed,
    /// Not processed (inactive, or not needed for a single-identity run).
    Skipped,
}

impl SourceStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::Failed => "failed",
            SourceStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ok" => Ok(SourceStatus::Ok),
            "failed" => Ok(SourceStatus::Failed),
            "skipped" => Ok(SourceStatus::Skipped),
            _ => Err(format!("Unknown source status: {s}")),
        }
    }
}

/// Run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, lock not yet requested.
    Pending,
    /// Cluster lock held.
    LockAcquired,
    /// Source queries outstanding.
    Fetching,
    /// Batches being reconciled into the identity store.
    Applying,
    /// Cursors being written.
    CursorAdvance,
    /// Every source succeeded.
    Completed,
    /// At least one source failed.
    PartiallyFailed,
    /// Not run: the lock was held elsewhere or the store is read-only.
    Skipped,
    /// Stopped by lock loss or a store outage; cursors not committed.
    Aborted,
}

impl RunState {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::LockAcquired => "lock_acquired",
            RunState::Fetching => "fetching",
            RunState::Applying => "applying",
            RunState::CursorAdvance => "cursor_advance",
            RunState::Completed => "completed",
            RunState::PartiallyFailed => "partially_failed",
            RunState::Skipped => "skipped",
            RunState::Aborted => "aborted",
        }
    }

    /// Check if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::PartiallyFailed | RunState::Skipped | RunState::Aborted
        )
    }

    /// Check if the run may move to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::{
            Aborted, Applying, Completed, CursorAdvance, Fetching, LockAcquired, PartiallyFailed,
            Pending, Skipped,
        };
        matches!(
            (self, next),
            (Pending, LockAcquired | Skipped | Aborted)
                | (LockAcquired, Fetching | Aborted)
                | (Fetching, Applying | Aborted)
                | (Applying, CursorAdvance | Aborted)
                | (CursorAdvance, Completed | PartiallyFailed | Aborted)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunState::Pending),
            "lock_acquired" => Ok(RunState::LockAcquired),
            "fetching" => Ok(RunState::Fetching),
            "applying" => Ok(RunState::Applying),
            "cursor_advance" => Ok(RunState::CursorAdvance),
            "completed" => Ok(RunState::Completed),
            "partially_failed" => Ok(RunState::PartiallyFailed),
            "skipped" => Ok(RunState::Skipped),
            "aborted" => Ok(RunState::Aborted),
            _ => Err(format!("Unknown run state: {s}")),
        }
    }
}

/// Bookkeeping record of one synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Run id.
    pub id: RunId,
    /// Tenant the run belongs to.
    pub tenant_id: TenantId,
    /// Run mode.
    pub mode: SyncMode,
    /// Current state.
    pub state: RunState,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome per source.
    #[serde(default)]
    pub per_source_status: BTreeMap<SourceId, SourceStatus>,
    /// Failure message per failed source.
    #[serde(default)]
    pub source_errors: BTreeMap<SourceId, String>,
    /// Whether deletion detection ran.
    #[serde(default)]
    pub deletions_detected: bool,
    /// Why the run was skipped or aborted.
    pub reason: Option<String>,
    /// Counters.
    #[serde(default)]
    pub statistics: RunStatistics,
}

impl SyncRun {
    /// Create a pending run.
    #[must_use]
    pub fn new(tenant_id: TenantId, mode: SyncMode) -> Self {
        Self {
            id: RunId::new(),
            tenant_id,
            mode,
            state: RunState::Pending,
            started_at: Utc::now(),
            completed_at: None,
            per_source_status: BTreeMap::new(),
            source_errors: BTreeMap::new(),
            deletions_detected: false,
            reason: None,
            statistics: RunStatistics::new(),
        }
    }

    /// Move to a new state, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: RunState) -> SyncResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::invalid_state_transition(
                self.state.as_str(),
                next.as_str(),
            ));
        }
        self.state = next;
        if next.is_terminal() {
            let now = Utc::now();
            self.completed_at = Some(now);
            let elapsed = (now - self.started_at).num_milliseconds().max(0);
            self.statistics.duration_ms = u64::try_from(elapsed).unwrap_or(0);
        }
        Ok(())
    }

    /// Record a source outcome.
    pub fn set_source_status(&mut self, source_id: &SourceId, status: SourceStatus) {
        self.per_source_status.insert(source_id.clone(), status);
    }

    /// Record a failed source with its error.
    pub fn fail_source(&mut self, source_id: &SourceId, error: impl Into<String>) {
        self.set_source_status(source_id, SourceStatus::Failed);
        self.source_errors.insert(source_id.clone(), error.into());
    }

    /// Outcome of a source, if it was processed.
    #[must_use]
    pub fn source_status(&self, source_id: &SourceId) -> Option<SourceStatus> {
        self.per_source_status.get(source_id).copied()
    }

    /// Sources that failed in this run.
    #[must_use]
    pub fn failed_sources(&self) -> Vec<SourceId> {
        self.per_source_status
            .iter()
            .filter(|(_, status)| **status == SourceStatus::Failed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether any source failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.per_source_status
            .values()
            .any(|status| *status == SourceStatus::Failed)
    }

    /// Whether full-run deletion detection may execute.
    ///
    /// Requires a full run in which every active source of `chain` reported
    /// `Ok` and every inactive source was skipped.
    #[must_use]
    pub fn deletion_permitted(&self, chain: &SourceChain) -> bool {
        self.mode.is_full()
            && chain.sources().all(|source| {
                let expected = if source.active {
                    SourceStatus::Ok
                } else {
                    SourceStatus::Skipped
                };
                self.source_status(&source.id) == Some(expected)
            })
    }

    /// Skip the run before the lock was taken.
    pub fn skip(&mut self, reason: impl Into<String>) -> SyncResult<()> {
        self.reason = Some(reason.into());
        self.transition(RunState::Skipped)
    }

    /// Abort the run.
    pub fn abort(&mut self, reason: impl Into<String>) -> SyncResult<()> {
        self.reason = Some(reason.into());
        self.transition(RunState::Aborted)
    }

    /// Finish after cursor advancement.
    pub fn finish(&mut self) -> SyncResult<()> {
        let next = if self.has_failures() {
            RunState::PartiallyFailed
        } else {
            RunState::Completed
        };
        self.transition(next)
    }
}

impl TenantAware for SyncRun {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
