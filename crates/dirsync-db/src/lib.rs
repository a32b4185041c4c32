//! # dirsync-db
//!
//! PostgreSQL implementations of the engine's identity, cursor and run
//! stores and of its cluster lock.
//!
//! ```rust,ignore
//! use dirsync_db::{connect, run_migrations, PgIdentityStore};
//!
//! let pool = connect("postgres://localhost/dirsync", 10).await?;
//! run_migrations(&pool).await?;
//! let identities = Arc::new(PgIdentityStore::new(pool.clone()));
//! ```

pub mod cursor;
pub mod error;
pub mod identity;
pub mod lock;
pub mod run;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use cursor::PgCursorStore;
pub use error::DbError;
pub use identity::PgIdentityStore;
pub use lock::PgClusterLock;
pub use run::PgRunStore;

/// Open a connection pool.
///
/// # Errors
///
/// Returns `DbError::ConnectionFailed` when the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)
}

/// Run all pending migrations from `migrations/`.
///
/// # Errors
///
/// Returns `DbError::MigrationFailed` if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DbError::MigrationFailed)?;

    tracing::info!("Migrations completed successfully");
    Ok(())
}
