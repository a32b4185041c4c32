//! Error types for the dirsync-db crate.
//!
//! Setup failures are reported as [`DbError`]. Failures inside store and
//! lock operations are translated into the engine's [`StoreError`] and
//! [`LockError`] so the orchestrator can tell outages from rejected writes.

use thiserror::Error;

use dirsync_engine::{LockError, StoreError};

/// Database setup errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish a database connection.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Whether the error means the database could not be reached at all.
pub(crate) fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Translate a query failure into a store error.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    if is_connection_error(&err) {
        StoreError::unavailable(err.to_string())
    } else {
        StoreError::write(err.to_string())
    }
}

/// Translate a query failure into a lock error.
pub(crate) fn lock_error(err: sqlx::Error) -> LockError {
    LockError::backend(err.to_string())
}
