//! Enum types for CoachDesk entities

use crate::error::{FieldError, FieldErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a wire enum with SCREAMING_SNAKE_CASE database names.
///
/// Parsing an unknown value yields a field-addressable `InvalidOption` error
/// so forms can highlight the offending input.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, field = $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Convert to database string representation.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }

            /// Parse from database string representation (case-insensitive).
            pub fn from_db_str(s: &str) -> Result<Self, FieldError> {
                let upper = s.trim().to_uppercase();
                $( if upper == $wire { return Ok($name::$variant); } )+
                Err(FieldError::new(
                    $field,
                    FieldErrorCode::InvalidOption,
                    format!("'{}' is not a valid {}", s, $field),
                ))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = FieldError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

wire_enum! {
    /// Entity family discriminator used in errors, logs and cache keys.
    EntityType, field = "entity_type" {
        CoachingCenter => "COACHING_CENTER",
        CoachingBranch => "COACHING_BRANCH",
        Address => "ADDRESS",
        Comment => "COMMENT",
    }
}

wire_enum! {
    /// Kind of teaching a coaching center offers.
    CenterCategory, field = "category" {
        SchoolCoaching => "SCHOOL_COACHING",
        CollegeTuition => "COLLEGE_TUITION",
        CompetitiveExam => "COMPETITIVE_EXAM",
        LanguageTraining => "LANGUAGE_TRAINING",
        SkillDevelopment => "SKILL_DEVELOPMENT",
        MusicAndArts => "MUSIC_AND_ARTS",
        Sports => "SPORTS",
        Other => "OTHER",
    }
}

wire_enum! {
    /// Moderation lifecycle of a coaching center listing.
    CenterStatus, field = "status" {
        /// Created but not yet submitted
        Draft => "DRAFT",
        /// Submitted and awaiting review
        PendingApproval => "PENDING_APPROVAL",
        /// Publicly listed
        Active => "ACTIVE",
        /// Hidden by its owner
        Inactive => "INACTIVE",
        /// Refused by moderation
        Rejected => "REJECTED",
    }
}

wire_enum! {
    /// What an address is used for.
    AddressType, field = "address_type" {
        Home => "HOME",
        Work => "WORK",
        Coaching => "COACHING",
        Billing => "BILLING",
        Other => "OTHER",
    }
}

wire_enum! {
    /// Role carried by an authenticated session.
    UserRole, field = "role" {
        Student => "STUDENT",
        Parent => "PARENT",
        Teacher => "TEACHER",
        CenterOwner => "CENTER_OWNER",
        Admin => "ADMIN",
    }
}

impl CenterStatus {
    /// Check if the listing is visible in public search.
    pub fn is_public(&self) -> bool {
        matches!(self, CenterStatus::Active)
    }
}

impl Default for CenterStatus {
    fn default() -> Self {
        CenterStatus::Draft
    }
}

impl Default for AddressType {
    fn default() -> Self {
        AddressType::Home
    }
}

impl UserRole {
    /// Check if the role bypasses ownership checks.
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_db_str() {
        for category in CenterCategory::ALL {
            let parsed: CenterCategory = category.as_db_str().parse().unwrap();
            assert_eq!(parsed, *category);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "school_coaching".parse::<CenterCategory>().unwrap(),
            CenterCategory::SchoolCoaching
        );
    }

    #[test]
    fn test_unknown_value_is_field_addressable() {
        let err = "BOARDING".parse::<CenterCategory>().unwrap_err();
        assert_eq!(err.field, "category");
        assert_eq!(err.code, FieldErrorCode::InvalidOption);
        assert!(err.message.contains("BOARDING"));
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&CenterStatus::PendingApproval).unwrap();
        assert_eq!(json, "\"PENDING_APPROVAL\"");
    }

    #[test]
    fn test_only_active_centers_are_public() {
        assert!(CenterStatus::Active.is_public());
        assert!(!CenterStatus::Draft.is_public());
        assert!(!CenterStatus::Rejected.is_public());
    }
}
