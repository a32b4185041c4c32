//! Principal kinds and keys.
//!
//! A principal is identified within a tenant by its kind and a
//! case-insensitive identifier. [`PrincipalKey`] carries the folded form and
//! is what every store and every claim set is keyed by.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of principal known to the identity store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// A person account.
    User,
    /// A group of users and/or other groups.
    Group,
}

impl PrincipalKind {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Group => "group",
        }
    }

    /// Fetch order within one source: groups are read before users.
    #[must_use]
    pub fn fetch_order() -> [PrincipalKind; 2] {
        [PrincipalKind::Group, PrincipalKind::User]
    }
}

impl Display for PrincipalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "person" => Ok(PrincipalKind::User),
            "group" => Ok(PrincipalKind::Group),
            _ => Err(format!("Unknown principal kind: {s}")),
        }
    }
}

/// Fold an identifier into its comparison form.
#[must_use]
pub fn fold_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Case-insensitive unique key of a principal within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalKey {
    /// Principal kind.
    pub kind: PrincipalKind,
    /// Folded identifier.
    identifier: String,
}

impl PrincipalKey {
    /// Build a key, folding the identifier.
    #[must_use]
    pub fn new(kind: PrincipalKind, identifier: &str) -> Self {
        Self {
            kind,
            identifier: fold_identifier(identifier),
        }
    }

    /// The folded identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Display for PrincipalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.identifier)
    }
}

/// Reference to a principal as reported by a source (original casing kept).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalRef {
    /// Principal kind.
    pub kind: PrincipalKind,
    /// Identifier as reported.
    pub identifier: String,
}

impl PrincipalRef {
    /// Create a reference.
    #[must_use]
    pub fn new(kind: PrincipalKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Reference to a user.
    #[must_use]
    pub fn user(identifier: impl Into<String>) -> Self {
        Self::new(PrincipalKind::User, identifier)
    }

    /// Reference to a group.
    #[must_use]
    pub fn group(identifier: impl Into<String>) -> Self {
        Self::new(PrincipalKind::Group, identifier)
    }

    /// Key for store lookups.
    #[must_use]
    pub fn key(&self) -> PrincipalKey {
        PrincipalKey::new(self.kind, &self.identifier)
    }
}
