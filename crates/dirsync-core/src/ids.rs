//! Strongly Typed Identifiers
//!
//! Newtype identifiers so that a tenant, a sync run and a directory source
//! can never be confused with one another at compile time.
//!
//! # Example
//!
//! ```
//! use dirsync_core::{RunId, SourceId, TenantId};
//!
//! let tenant = TenantId::new();
//! let run = RunId::new();
//! let source = SourceId::new("corp-ldap");
//!
//! fn requires_tenant(id: TenantId) -> String {
//!     id.to_string()
//! }
//!
//! let _ = requires_tenant(tenant);
//! // requires_tenant(run); // This would not compile!
//! assert_eq!(source.as_str(), "corp-ldap");
//! # let _ = run;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed UUID-backed ID type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Strongly typed identifier for tenants.
    ///
    /// Every principal, cursor, lock and run is scoped to exactly one tenant.
    ///
    /// # Example
    ///
    /// ```
    /// use dirsync_core::TenantId;
    /// use uuid::Uuid;
    ///
    /// let uuid = Uuid::new_v4();
    /// let tenant_id = TenantId::from_uuid(uuid);
    /// assert_eq!(tenant_id.as_uuid(), &uuid);
    ///
    /// let parsed: TenantId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
    /// assert_eq!(parsed.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    /// ```
    TenantId
);

define_id!(
    /// Strongly typed identifier for a synchronization run.
    RunId
);

/// Stable name of a directory source in the chain (e.g. `"corp-ldap"`).
///
/// Unlike tenants and runs, sources are named by configuration, so the
/// identifier is a string rather than a UUID. Source names are compared
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a source id from its configured name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the configured name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is usable (non-blank).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
