//! # Chained Directory Synchronization Engine
//!
//! Reconciles a local identity store (users and groups) against an ordered
//! chain of directory sources. Name collisions are resolved by source
//! precedence, deletions are detected by full runs, and a lease-based
//! cluster lock guarantees a single run per tenant across nodes.
//!
//! ## Modules
//!
//! - [`chain`] - Sources and the precedence-ordered source chain
//! - [`reconcile`] - Merge decisions, batch application, deletion detection
//! - [`orchestrator`] - Run lifecycle: lock, fetch, apply, cursors
//! - [`lock`] - Cluster lock contract, lease keeper, in-memory lock
//! - [`store`] - Identity, cursor and run store contracts
//! - [`cursor`] - Cursor advancement rules
//! - [`config`] / [`logging`] - Configuration loading and log setup
//!
//! ## Example
//!
//! ```ignore
//! use dirsync_engine::{SyncConfig, SyncOrchestrator, SourceChain};
//!
//! let config = SyncConfig::from_file("dirsync.yaml")?;
//! let chain = SourceChain::from_configs(&config.sources, &adapters)?;
//! let orchestrator = SyncOrchestrator::new(chain, identities, cursors, runs, lock, config)?;
//!
//! let run = orchestrator.full(tenant_id).await?;
//! println!("{} finished as {}", run.id, run.state);
//! ```

pub mod chain;
pub mod config;
pub mod cursor;
pub mod error;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod principal;
pub mod reconcile;
pub mod run;
pub mod statistics;
pub mod store;

pub use chain::{ChainLink, Source, SourceChain, SourceConfig};
pub use config::SyncConfig;
pub use cursor::{CursorPlan, CursorUpdate, SourceWatermarks};
pub use error::{LockError, LockResult, StoreError, StoreResult, SyncError, SyncResult};
pub use lock::{
    ClusterLock, LeaseKeeper, LockAcquisition, LockHandle, LockKey, MemoryClusterLock,
};
pub use logging::{init_logging, init_test_logging, LogFormat, LoggingConfig};
pub use orchestrator::{OnDemandOutcome, SyncOrchestrator};
pub use principal::Principal;
pub use reconcile::{decide, Claims, MergeDecision, Reconciler};
pub use run::{RunState, SourceStatus, SyncMode, SyncRun};
pub use statistics::{RunStatistics, SourceStatistics};
pub use store::{
    CursorStore, IdentityStore, MemoryCursorStore, MemoryIdentityStore, MemoryRunStore, RunStore,
};
