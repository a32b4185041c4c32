//! dirsync Core Library
//!
//! Shared types for the chained directory synchronization engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (TenantId, RunId, SourceId)
//! - [`principal`] - Principal kinds and case-insensitive principal keys
//! - [`traits`] - Multi-tenant traits (TenantAware)
//!
//! # Example
//!
//! ```
//! use dirsync_core::{PrincipalKey, PrincipalKind, SourceId, TenantId};
//!
//! let tenant_id = TenantId::new();
//! let source = SourceId::new("corp-ldap");
//!
//! // Identifiers compare case-insensitively within a kind
//! let a = PrincipalKey::new(PrincipalKind::User, "JDoe");
//! let b = PrincipalKey::new(PrincipalKind::User, "jdoe");
//! assert_eq!(a, b);
//! # let _ = (tenant_id, source);
//! ```

pub mod ids;
pub mod principal;
pub mod traits;

pub use ids::{ParseIdError, RunId, SourceId, TenantId};
pub use principal::{PrincipalKey, PrincipalKind, PrincipalRef};
pub use traits::TenantAware;
