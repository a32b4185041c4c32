//! Principals held in the local identity store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dirsync_core::{PrincipalKey, PrincipalKind, PrincipalRef, SourceId, TenantAware, TenantId};
use dirsync_directory::{AttributeMap, RemoteRecord};

/// A user or group in the local identity store, tagged with its owning
/// source.
///
/// At most one non-tombstoned principal exists per tenant and
/// [`PrincipalKey`]; a tombstoned row is replaced when the identity is
/// asserted again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Principal kind.
    pub kind: PrincipalKind,
    /// Identifier as last reported by the owning source.
    pub identifier: String,
    /// Attributes as last reported by the owning source.
    pub attributes: AttributeMap,
    /// Direct members (groups only).
    #[serde(default)]
    pub members: Vec<PrincipalRef>,
    /// Source that owns this principal.
    pub owner_source_id: SourceId,
    /// Modification timestamp reported by the owning source.
    pub last_modified_at_source: DateTime<Utc>,
    /// Deleted by full-run deletion detection.
    #[serde(default)]
    pub tombstoned: bool,
}

impl Principal {
    /// Build a principal from a remote record.
    #[must_use]
    pub fn from_record(tenant_id: TenantId, owner: &SourceId, record: &RemoteRecord) -> Self {
        Self {
            tenant_id,
            kind: record.kind,
            identifier: record.identifier.trim().to_string(),
            attributes: record.attributes.clone(),
            members: record.members.clone(),
            owner_source_id: owner.clone(),
            last_modified_at_source: record.last_modified_at_source,
            tombstoned: false,
        }
    }

    /// Case-insensitive key.
    #[must_use]
    pub fn key(&self) -> PrincipalKey {
        PrincipalKey::new(self.kind, &self.identifier)
    }

    /// Whether the principal is owned by the given source.
    #[must_use]
    pub fn is_owned_by(&self, source_id: &SourceId) -> bool {
        &self.owner_source_id == source_id
    }
}

impl TenantAware for Principal {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_record() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let record = RemoteRecord::group(" Staff ", ts)
            .with_attribute("description", "All staff")
            .with_member(PrincipalRef::user("jdoe"));
        let tenant = TenantId::new();
        let owner = SourceId::new("ldap");

        let principal = Principal::from_record(tenant, &owner, &record);
        assert_eq!(principal.identifier, "Staff");
        assert_eq!(principal.key(), PrincipalKey::new(PrincipalKind::Group, "staff"));
        assert_eq!(principal.members.len(), 1);
        assert!(principal.is_owned_by(&owner));
        assert!(principal.belongs_to(tenant));
        assert!(!principal.tombstoned);
    }
}
