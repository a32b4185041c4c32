//! Remote records returned by directory sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use dirsync_core::{PrincipalKey, PrincipalKind, PrincipalRef};

/// Attribute map of a principal. Values are opaque to the engine.
pub type AttributeMap = BTreeMap<String, serde_json::Value>;

/// A single user or group as reported by a directory source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Principal kind.
    pub kind: PrincipalKind,
    /// Identifier as reported by the source.
    pub identifier: String,
    /// Attributes as reported by the source.
    #[serde(default)]
    pub attributes: AttributeMap,
    /// Direct members (groups only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<PrincipalRef>,
    /// Modification timestamp reported by the source.
    pub last_modified_at_source: DateTime<Utc>,
}

impl RemoteRecord {
    /// Create a record with no attributes.
    #[must_use]
    pub fn new(
        kind: PrincipalKind,
        identifier: impl Into<String>,
        last_modified_at_source: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            attributes: AttributeMap::new(),
            members: Vec::new(),
            last_modified_at_source,
        }
    }

    /// Create a user record.
    #[must_use]
    pub fn user(identifier: impl Into<String>, last_modified_at_source: DateTime<Utc>) -> Self {
        Self::new(PrincipalKind::User, identifier, last_modified_at_source)
    }

    /// Create a group record.
    #[must_use]
    pub fn group(identifier: impl Into<String>, last_modified_at_source: DateTime<Utc>) -> Self {
        Self::new(PrincipalKind::Group, identifier, last_modified_at_source)
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a direct member.
    #[must_use]
    pub fn with_member(mut self, member: PrincipalRef) -> Self {
        self.members.push(member);
        self
    }

    /// Case-insensitive key of this record.
    #[must_use]
    pub fn key(&self) -> PrincipalKey {
        PrincipalKey::new(self.kind, &self.identifier)
    }

    /// Check that the record can be applied to the identity store.
    pub fn validate(&self) -> Result<(), RecordError> {
        let identifier = self.identifier.trim();
        if identifier.is_empty() {
            return Err(RecordError::EmptyIdentifier { kind: self.kind });
        }
        if identifier.chars().any(char::is_control) {
            return Err(RecordError::ControlCharacter {
                identifier: self.identifier.clone(),
            });
        }
        if self.kind == PrincipalKind::User && !self.members.is_empty() {
            return Err(RecordError::MembersOnUser {
                identifier: self.identifier.clone(),
            });
        }

        let own_key = self.key();
        for member in &self.members {
            if member.identifier.trim().is_empty() {
                return Err(RecordError::EmptyMember {
                    identifier: self.identifier.clone(),
                });
            }
            if member.key() == own_key {
                return Err(RecordError::SelfMembership {
                    identifier: self.identifier.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Reasons a single remote record is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{kind} record has an empty identifier")]
    EmptyIdentifier { kind: PrincipalKind },

    #[error("identifier '{identifier}' contains control characters")]
    ControlCharacter { identifier: String },

    #[error("user '{identifier}' cannot have members")]
    MembersOnUser { identifier: String },

    #[error("group '{identifier}' has a member with an empty identifier")]
    EmptyMember { identifier: String },

    #[error("group '{identifier}' lists itself as a member")]
    SelfMembership { identifier: String },
}
