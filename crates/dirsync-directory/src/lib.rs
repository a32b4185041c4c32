//! # Directory Source Adapters
//!
//! The boundary between the synchronization engine and the external
//! registries (LDAP servers, Active Directory, other identity providers)
//! that make up a source chain.
//!
//! This crate provides:
//! - [`DirectorySource`] - the adapter contract every registry implements
//! - [`RemoteRecord`] - a user or group as reported by a registry
//! - [`SourceError`] - adapter errors with transient/permanent classification
//! - [`FetchPolicy`] - per-source timeout and retry with exponential backoff
//!
//! ## Example
//!
//! ```ignore
//! use dirsync_directory::{DirectorySource, FetchPolicy};
//! use dirsync_core::PrincipalKind;
//!
//! let policy = FetchPolicy::default();
//! let groups = policy
//!     .execute(|| adapter.fetch(tenant_id, PrincipalKind::Group, since))
//!     .await?;
//! ```

pub mod error;
pub mod record;
pub mod resilience;
pub mod traits;

pub use error::{SourceError, SourceResult};
pub use record::{AttributeMap, RecordError, RemoteRecord};
pub use resilience::{FetchPolicy, RetryConfig};
pub use traits::DirectorySource;
