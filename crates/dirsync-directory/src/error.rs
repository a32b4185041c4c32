//! Directory source error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error that can occur while querying a directory source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source could not be reached or refused the query.
    #[error("source unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The query did not complete within its time budget.
    #[error("source query timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The adapter cannot answer "modified since" queries.
    #[error("source does not support incremental queries")]
    IncrementalNotSupported,

    /// The source returned data that could not be turned into records.
    #[error("invalid data from source: {message}")]
    InvalidData { message: String },

    /// Authentication against the source failed.
    #[error("authentication against source failed")]
    AuthenticationFailed,

    /// Internal adapter error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SourceError {
    /// Check if this error is transient and the query should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Unavailable { .. } | SourceError::Timeout { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SourceError::Unavailable { .. } => "SOURCE_UNAVAILABLE",
            SourceError::Timeout { .. } => "SOURCE_TIMEOUT",
            SourceError::IncrementalNotSupported => "INCREMENTAL_NOT_SUPPORTED",
            SourceError::InvalidData { .. } => "INVALID_DATA",
            SourceError::AuthenticationFailed => "AUTH_FAILED",
            SourceError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        SourceError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unavailable error with source.
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SourceError::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        SourceError::InvalidData {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        SourceError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for directory source operations.
pub type SourceResult<T> = Result<T, SourceError>;
