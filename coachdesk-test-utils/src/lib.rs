//! CoachDesk Test Utilities
//!
//! Shared test infrastructure for the CoachDesk workspace:
//! - Proptest generators for records, drafts and queries
//! - Fixtures for sessions and sample records
//! - Assertions for the error taxonomy

pub use coachdesk_core::{
    AccessToken, Address, AddressId, AddressType, BranchId, CenterCategory, CenterFilters,
    CenterId, CenterStatus, CoachingBranch, CoachingCenter, Comment, CommentId, DeskError,
    DeskResult, EntityType, FieldErrorCode, GeoPoint, NewAddress, NewCenter, PostId, Session,
    Timestamp, UserId, UserRole,
};

use chrono::{Duration, Utc};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CoachDesk types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_center_category() -> impl Strategy<Value = CenterCategory> {
        prop::sample::select(CenterCategory::ALL)
    }

    pub fn arb_center_status() -> impl Strategy<Value = CenterStatus> {
        prop::sample::select(CenterStatus::ALL)
    }

    pub fn arb_address_type() -> impl Strategy<Value = AddressType> {
        prop::sample::select(AddressType::ALL)
    }

    /// A valid six-digit Indian PIN code.
    pub fn arb_pin_code() -> impl Strategy<Value = String> {
        "[1-9][0-9]{5}"
    }

    /// A string that is not a valid PIN code.
    pub fn arb_invalid_pin_code() -> impl Strategy<Value = String> {
        prop_oneof![
            "0[0-9]{5}",
            "[1-9][0-9]{0,4}",
            "[1-9][0-9]{6,8}",
            "[1-9][0-9]{2}[a-z][0-9]{2}",
        ]
    }

    pub fn arb_center_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,20}( [A-Z][a-z]{2,12}){0,2}"
    }

    /// A point inside India's bounding box.
    pub fn arb_geo_point() -> impl Strategy<Value = GeoPoint> {
        (8.0f64..37.0, 68.0f64..97.0).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
    }

    /// A draft that passes validation.
    pub fn arb_new_center() -> impl Strategy<Value = NewCenter> {
        (
            arb_center_name(),
            arb_center_category(),
            prop::collection::vec("[A-Za-z]{3,15}", 0..5),
            prop::option::of(1900i32..2020),
            prop::option::of("[a-z]{3,10}@[a-z]{3,8}\\.(com|in|org)"),
            prop::option::of("\\+91[6-9][0-9]{9}"),
        )
            .prop_map(|(name, category, subjects, year, email, phone)| {
                let mut draft = NewCenter::new(name, category);
                draft.subjects = subjects;
                draft.established_year = year;
                draft.contact_email = email;
                draft.contact_phone = phone;
                draft
            })
    }

    /// A draft that passes validation, with or without coordinates.
    pub fn arb_new_address() -> impl Strategy<Value = NewAddress> {
        (
            "[A-Z][a-z]{3,15}",
            "[A-Z][a-z]{3,15}",
            arb_pin_code(),
            arb_address_type(),
            prop::option::of(arb_geo_point()),
            any::<bool>(),
        )
            .prop_map(|(state, district, pin, kind, point, primary)| {
                let mut draft = NewAddress::new(state, district, pin);
                draft.address_type = kind;
                draft.is_primary = primary;
                match point {
                    Some(point) => draft.with_location(point),
                    None => draft,
                }
            })
    }

    /// A stored center with a sequential id, owned by `owner`.
    pub fn arb_center(owner: UserId) -> impl Strategy<Value = CoachingCenter> {
        (
            any::<u32>(),
            arb_center_name(),
            arb_center_category(),
            arb_center_status(),
            0.0f32..5.0,
            arb_timestamp(),
        )
            .prop_map(move |(n, name, category, status, rating, created_at)| {
                let mut center = fixtures::center(&format!("center-{:010}", n), &owner);
                center.name = name;
                center.category = category;
                center.status = status;
                center.rating_average = rating;
                center.created_at = created_at;
                center.updated_at = created_at;
                center
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and sessions for common scenarios.

    use super::*;

    /// A signed-in session for `user` with the given role.
    pub fn session_as(user: &str, role: UserRole) -> Session {
        Session::authenticated(UserId::from(user), role, AccessToken::new(format!("token-{}", user)))
    }

    pub fn owner_session() -> Session {
        session_as("owner-1", UserRole::CenterOwner)
    }

    pub fn student_session() -> Session {
        session_as("student-1", UserRole::Student)
    }

    pub fn admin_session() -> Session {
        session_as("admin-1", UserRole::Admin)
    }

    /// A session whose token expired an hour ago.
    pub fn expired_session() -> Session {
        owner_session().with_expiry(Utc::now() - Duration::hours(1))
    }

    pub fn center(id: &str, owner: &UserId) -> CoachingCenter {
        let now = Utc::now();
        CoachingCenter {
            id: CenterId::from(id),
            owner_id: owner.clone(),
            name: format!("Center {}", id),
            description: None,
            category: CenterCategory::SchoolCoaching,
            subjects: Vec::new(),
            established_year: None,
            contact_email: None,
            contact_phone: None,
            website_url: None,
            logo_url: None,
            status: CenterStatus::Active,
            is_verified: false,
            rating_average: 0.0,
            review_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `count` centers of one category with strictly increasing creation
    /// times and zero-padded names, so name and date orders agree.
    pub fn centers(count: usize, category: CenterCategory, owner: &UserId) -> Vec<CoachingCenter> {
        let base = Utc::now() - Duration::days(30);
        (0..count)
            .map(|i| {
                let mut center = center(&format!("center-{:03}", i), owner);
                center.name = format!("Center {:03}", i);
                center.category = category;
                center.created_at = base + Duration::seconds(i as i64);
                center.updated_at = center.created_at;
                center
            })
            .collect()
    }

    pub fn branch(id: &str, center_id: &CenterId, main: bool) -> CoachingBranch {
        let now = Utc::now();
        CoachingBranch {
            id: BranchId::from(id),
            center_id: center_id.clone(),
            name: format!("Branch {}", id),
            address_id: None,
            contact_phone: None,
            contact_email: None,
            is_main_branch: main,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn address(id: &str, user: &UserId, primary: bool) -> Address {
        let now = Utc::now();
        Address {
            id: AddressId::from(id),
            user_id: Some(user.clone()),
            branch_id: None,
            address_type: AddressType::Home,
            label: None,
            address_line_1: None,
            address_line_2: None,
            city: Some("New Delhi".to_string()),
            district: "ND".to_string(),
            state: "Delhi".to_string(),
            country: "India".to_string(),
            pin_code: "110001".to_string(),
            latitude: None,
            longitude: None,
            is_primary: primary,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn comment(id: &str, post_id: &PostId, author: &UserId) -> Comment {
        let now = Utc::now();
        Comment {
            id: CommentId::from(id),
            post_id: post_id.clone(),
            author_id: author.clone(),
            parent_id: None,
            content: format!("Comment {}", id),
            like_count: 0,
            is_edited: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for CoachDesk results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &DeskResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &DeskResult<T>, entity_type: EntityType) {
        match result {
            Err(DeskError::NotFound { entity_type: et, .. }) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    #[track_caller]
    pub fn assert_permission_denied<T: std::fmt::Debug>(result: &DeskResult<T>) {
        match result {
            Err(DeskError::PermissionDenied { .. }) => {}
            other => panic!("Expected PermissionDenied, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_query<T: std::fmt::Debug>(result: &DeskResult<T>) {
        match result {
            Err(DeskError::InvalidQuery { .. }) => {}
            other => panic!("Expected InvalidQuery, got: {:?}", other),
        }
    }

    /// Assert a validation failure that names `field` with `code`.
    #[track_caller]
    pub fn assert_field_error<T: std::fmt::Debug>(
        result: &DeskResult<T>,
        field: &str,
        code: FieldErrorCode,
    ) {
        match result {
            Err(error @ DeskError::ValidationFailed(_)) => {
                let found = error
                    .field_errors()
                    .iter()
                    .find(|e| e.field == field)
                    .unwrap_or_else(|| panic!("No error for field '{}' in {:?}", field, error));
                assert_eq!(found.code, code, "Wrong code for field '{}'", field);
            }
            other => panic!("Expected ValidationFailed on '{}', got: {:?}", field, other),
        }
    }

    /// Assert that at most one address per user is primary.
    #[track_caller]
    pub fn assert_single_primary<'a>(addresses: impl IntoIterator<Item = &'a Address>, user: &UserId) {
        let primaries: Vec<&AddressId> = addresses
            .into_iter()
            .filter(|a| a.user_id.as_ref() == Some(user) && a.is_primary)
            .map(|a| &a.id)
            .collect();
        assert!(
            primaries.len() <= 1,
            "Expected at most one primary address for {}, got {:?}",
            user,
            primaries
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
