//! Engine error types.
//!
//! Three layers of errors meet in the engine: store errors from the
//! persistence contracts, lock errors from the cluster lock backend, and
//! [`SyncError`], which is what the orchestrator reports to callers.

use thiserror::Error;

use dirsync_core::{SourceId, TenantId};
use dirsync_directory::{RecordError, SourceError};

/// Errors reported by identity, cursor and run stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached at all.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// A single write was rejected.
    #[error("store write failed: {message}")]
    Write { message: String },

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value the engine does not understand.
    #[error("invalid stored row: {message}")]
    InvalidRow { message: String },
}

impl StoreError {
    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Create an invalid row error.
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow {
            message: message.into(),
        }
    }

    /// Whether this is a total outage rather than a single failed write.
    pub fn is_outage(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a cluster lock backend.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock service failed to answer.
    #[error("lock backend error: {message}")]
    Backend { message: String },
}

impl LockError {
    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A directory source could not be queried.
    #[error("source '{source_id}' unavailable: {error}")]
    SourceUnavailable {
        source_id: SourceId,
        #[source]
        error: SourceError,
    },

    /// A remote record was rejected.
    #[error("invalid record '{identifier}' from source '{source_id}': {error}")]
    RecordValidation {
        source_id: SourceId,
        identifier: String,
        #[source]
        error: RecordError,
    },

    /// The cluster lock was lost while the run was in progress.
    #[error("synchronization lock lost for tenant {tenant_id}")]
    LockLost { tenant_id: TenantId },

    /// The lock backend failed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// A write to the identity or cursor store failed.
    #[error("persistence failure: {message}")]
    Persistence { message: String },

    /// The identity or cursor store is entirely unavailable.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The source chain is malformed.
    #[error("invalid source chain: {message}")]
    InvalidChain { message: String },

    /// Invalid run state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a source unavailable error.
    pub fn source_unavailable(source_id: SourceId, error: SourceError) -> Self {
        Self::SourceUnavailable { source_id, error }
    }

    /// Create a record validation error.
    pub fn record_validation(
        source_id: SourceId,
        identifier: impl Into<String>,
        error: RecordError,
    ) -> Self {
        Self::RecordValidation {
            source_id,
            identifier: identifier.into(),
            error,
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid chain error.
    pub fn invalid_chain(message: impl Into<String>) -> Self {
        Self::InvalidChain {
            message: message.into(),
        }
    }

    /// Create an invalid state transition error.
    pub fn invalid_state_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error ends the whole run rather than a single source.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            SyncError::LockLost { .. } | SyncError::Lock(_) | SyncError::StoreUnavailable { .. }
        )
    }

    /// Whether retrying the run later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::SourceUnavailable { error, .. } => error.is_transient(),
            SyncError::LockLost { .. }
            | SyncError::Lock(_)
            | SyncError::Persistence { .. }
            | SyncError::StoreUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            SyncError::RecordValidation { .. } => "RECORD_VALIDATION",
            SyncError::LockLost { .. } => "LOCK_LOST",
            SyncError::Lock(_) => "LOCK_ERROR",
            SyncError::Persistence { .. } => "PERSISTENCE_FAILURE",
            SyncError::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            SyncError::Configuration { .. } => "CONFIGURATION_ERROR",
            SyncError::InvalidChain { .. } => "INVALID_CHAIN",
            SyncError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            SyncError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => SyncError::StoreUnavailable { message },
            other => SyncError::Persistence {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
