//! Identity types for CoachDesk entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Common behavior of every typed entity identifier.
///
/// Identifiers are opaque strings issued by the backend. Locally generated
/// identifiers use UUIDv7 so they sort by creation time.
pub trait EntityKey:
    Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Borrow the raw identifier string.
    fn as_str(&self) -> &str;

    /// Mint a fresh identifier.
    fn mint() -> Self;

    /// True when the identifier is empty or whitespace-only.
    fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

macro_rules! define_entity_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a fresh UUIDv7-backed identifier.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Consume the identifier, returning the raw string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl EntityKey for $name {
            fn as_str(&self) -> &str {
                &self.0
            }

            fn mint() -> Self {
                Self::generate()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_entity_key!(
    /// Identifier of a coaching center.
    CenterId
);
define_entity_key!(
    /// Identifier of a coaching center branch.
    BranchId
);
define_entity_key!(
    /// Identifier of a postal address.
    AddressId
);
define_entity_key!(
    /// Identifier of a comment on a post.
    CommentId
);
define_entity_key!(
    /// Identifier of a post.
    PostId
);
define_entity_key!(
    /// Identifier of an authenticated user.
    UserId
);
