//! Multi-Tenant Traits
//!
//! # Example
//!
//! ```
//! use dirsync_core::{TenantAware, TenantId};
//!
//! struct Cursor {
//!     tenant_id: TenantId,
//! }
//!
//! impl TenantAware for Cursor {
//!     fn tenant_id(&self) -> TenantId {
//!         self.tenant_id
//!     }
//! }
//!
//! let tenant = TenantId::new();
//! let cursor = Cursor { tenant_id: tenant };
//! assert!(cursor.belongs_to(tenant));
//! ```

use crate::ids::TenantId;

/// Trait for entities that belong to a specific tenant.
///
/// This trait is object-safe and can be used as `&dyn TenantAware`.
pub trait TenantAware {
    /// Returns the tenant ID this entity belongs to.
    fn tenant_id(&self) -> TenantId;

    /// Whether this entity belongs to `tenant`.
    fn belongs_to(&self, tenant: TenantId) -> bool {
        self.tenant_id() == tenant
    }
}
