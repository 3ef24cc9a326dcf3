//! Core entity structures
//!
//! Each entity family has three shapes: the record as the backend returns
//! it, a draft used to create it, and a patch whose set fields overwrite the
//! record on update. Server-computed fields (`rating_average`,
//! `review_count`, `like_count`, timestamps) never appear in drafts or
//! patches.

use crate::error::{DeskResult, FieldError, FieldErrorCode, ValidationErrors};
use crate::geo::GeoPoint;
use crate::validation::{self, HasUpdates, Validate, ValidateRange};
use crate::{
    AddressId, AddressType, BranchId, CenterCategory, CenterId, CenterStatus, CommentId,
    EntityKey, PostId, Timestamp, UserId,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

const NAME_MIN: usize = 1;
const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 2000;
const MAX_SUBJECTS: usize = 20;
const SUBJECT_MAX: usize = 50;
const EARLIEST_ESTABLISHED_YEAR: i32 = 1800;
const LABEL_MAX: usize = 50;
const ADDRESS_LINE_MAX: usize = 200;
const REGION_MIN: usize = 2;
const REGION_MAX: usize = 50;
const COMMENT_MAX: usize = 2000;

/// Default country for addresses that do not name one.
pub const DEFAULT_COUNTRY: &str = "India";

// ============================================================================
// COACHING CENTER
// ============================================================================

/// A coaching center listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CoachingCenter {
    pub id: CenterId,
    pub owner_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub category: CenterCategory,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub established_year: Option<i32>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
    pub status: CenterStatus,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub rating_average: f32,
    #[serde(default)]
    pub review_count: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// Payload for creating a coaching center. The owner is the session user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewCenter {
    pub name: String,
    pub description: Option<String>,
    pub category: CenterCategory,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub established_year: Option<i32>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
}

impl NewCenter {
    pub fn new(name: impl Into<String>, category: CenterCategory) -> Self {
        Self {
            name: name.into(),
            description: None,
            category,
            subjects: Vec::new(),
            established_year: None,
            contact_email: None,
            contact_phone: None,
            website_url: None,
            logo_url: None,
        }
    }
}

/// Partial update of a coaching center.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CenterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CenterCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub established_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CenterStatus>,
}

impl CenterPatch {
    /// Overwrite the record's fields with every field set in this patch.
    pub fn apply_to(&self, center: &mut CoachingCenter) {
        if let Some(name) = &self.name {
            center.name = name.clone();
        }
        if let Some(description) = &self.description {
            center.description = Some(description.clone());
        }
        if let Some(category) = self.category {
            center.category = category;
        }
        if let Some(subjects) = &self.subjects {
            center.subjects = subjects.clone();
        }
        if let Some(year) = self.established_year {
            center.established_year = Some(year);
        }
        if let Some(email) = &self.contact_email {
            center.contact_email = Some(email.clone());
        }
        if let Some(phone) = &self.contact_phone {
            center.contact_phone = Some(phone.clone());
        }
        if let Some(url) = &self.website_url {
            center.website_url = Some(url.clone());
        }
        if let Some(url) = &self.logo_url {
            center.logo_url = Some(url.clone());
        }
        if let Some(status) = self.status {
            center.status = status;
        }
    }
}

impl HasUpdates for CenterPatch {
    fn has_any_updates(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.category.is_some()
            || self.subjects.is_some()
            || self.established_year.is_some()
            || self.contact_email.is_some()
            || self.contact_phone.is_some()
            || self.website_url.is_some()
            || self.logo_url.is_some()
            || self.status.is_some()
    }
}

#[allow(clippy::too_many_arguments)]
fn check_center_fields(
    errors: &mut ValidationErrors,
    name: Option<&str>,
    description: Option<&str>,
    subjects: Option<&[String]>,
    established_year: Option<i32>,
    contact_email: Option<&str>,
    contact_phone: Option<&str>,
    website_url: Option<&str>,
    logo_url: Option<&str>,
) {
    errors.check(validation::optional(name, |v| {
        validation::required("name", v)?;
        validation::length("name", v, NAME_MIN, NAME_MAX)
    }));
    errors.check(validation::optional(description, |v| {
        validation::length("description", v, 0, DESCRIPTION_MAX)
    }));
    if let Some(subjects) = subjects {
        if subjects.len() > MAX_SUBJECTS {
            errors.push(FieldError::new(
                "subjects",
                FieldErrorCode::TooLong,
                format!("at most {} subjects are allowed", MAX_SUBJECTS),
            ));
        }
        for subject in subjects {
            errors.check(validation::length("subjects", subject, 1, SUBJECT_MAX));
        }
    }
    if let Some(year) = established_year {
        errors.check(year.validate_range(
            "established_year",
            EARLIEST_ESTABLISHED_YEAR,
            Utc::now().year(),
        ));
    }
    errors.check(validation::optional(contact_email, |v| {
        validation::email("contact_email", v)
    }));
    errors.check(validation::optional(contact_phone, |v| {
        validation::phone("contact_phone", v)
    }));
    errors.check(validation::optional(website_url, |v| {
        validation::url("website_url", v)
    }));
    errors.check(validation::optional(logo_url, |v| {
        validation::url("logo_url", v)
    }));
}

impl Validate for NewCenter {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        check_center_fields(
            &mut errors,
            Some(&self.name),
            self.description.as_deref(),
            Some(&self.subjects),
            self.established_year,
            self.contact_email.as_deref(),
            self.contact_phone.as_deref(),
            self.website_url.as_deref(),
            self.logo_url.as_deref(),
        );
        errors.into_result()
    }
}

impl Validate for CenterPatch {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        errors.check(self.validate_has_updates());
        check_center_fields(
            &mut errors,
            self.name.as_deref(),
            self.description.as_deref(),
            self.subjects.as_deref(),
            self.established_year,
            self.contact_email.as_deref(),
            self.contact_phone.as_deref(),
            self.website_url.as_deref(),
            self.logo_url.as_deref(),
        );
        errors.into_result()
    }
}

// ============================================================================
// COACHING BRANCH
// ============================================================================

/// A physical branch of a coaching center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CoachingBranch {
    pub id: BranchId,
    pub center_id: CenterId,
    pub name: String,
    pub address_id: Option<AddressId>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    #[serde(default)]
    pub is_main_branch: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewBranch {
    pub center_id: CenterId,
    pub name: String,
    pub address_id: Option<AddressId>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    #[serde(default)]
    pub is_main_branch: bool,
}

impl NewBranch {
    pub fn new(center_id: CenterId, name: impl Into<String>) -> Self {
        Self {
            center_id,
            name: name.into(),
            address_id: None,
            contact_phone: None,
            contact_email: None,
            is_main_branch: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BranchPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<AddressId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_main_branch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl BranchPatch {
    pub fn apply_to(&self, branch: &mut CoachingBranch) {
        if let Some(name) = &self.name {
            branch.name = name.clone();
        }
        if let Some(address_id) = &self.address_id {
            branch.address_id = Some(address_id.clone());
        }
        if let Some(phone) = &self.contact_phone {
            branch.contact_phone = Some(phone.clone());
        }
        if let Some(email) = &self.contact_email {
            branch.contact_email = Some(email.clone());
        }
        if let Some(is_main) = self.is_main_branch {
            branch.is_main_branch = is_main;
        }
        if let Some(is_active) = self.is_active {
            branch.is_active = is_active;
        }
    }
}

impl HasUpdates for BranchPatch {
    fn has_any_updates(&self) -> bool {
        self.name.is_some()
            || self.address_id.is_some()
            || self.contact_phone.is_some()
            || self.contact_email.is_some()
            || self.is_main_branch.is_some()
            || self.is_active.is_some()
    }
}

fn check_branch_contact(
    errors: &mut ValidationErrors,
    name: Option<&str>,
    contact_phone: Option<&str>,
    contact_email: Option<&str>,
) {
    errors.check(validation::optional(name, |v| {
        validation::required("name", v)?;
        validation::length("name", v, NAME_MIN, NAME_MAX)
    }));
    errors.check(validation::optional(contact_phone, |v| {
        validation::phone("contact_phone", v)
    }));
    errors.check(validation::optional(contact_email, |v| {
        validation::email("contact_email", v)
    }));
}

impl Validate for NewBranch {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        if self.center_id.is_blank() {
            errors.push(FieldError::new(
                "center_id",
                FieldErrorCode::Required,
                "is required",
            ));
        }
        check_branch_contact(
            &mut errors,
            Some(&self.name),
            self.contact_phone.as_deref(),
            self.contact_email.as_deref(),
        );
        errors.into_result()
    }
}

impl Validate for BranchPatch {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        errors.check(self.validate_has_updates());
        check_branch_contact(
            &mut errors,
            self.name.as_deref(),
            self.contact_phone.as_deref(),
            self.contact_email.as_deref(),
        );
        errors.into_result()
    }
}

// ============================================================================
// ADDRESS
// ============================================================================

/// A postal address belonging to a user or to a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Address {
    pub id: AddressId,
    pub user_id: Option<UserId>,
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub address_type: AddressType,
    pub label: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub district: String,
    pub state: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub pin_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub is_primary: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

impl Address {
    /// The address location, when both coordinates are known.
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewAddress {
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub address_type: AddressType,
    pub label: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub district: String,
    pub state: String,
    pub country: Option<String>,
    pub pin_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub is_primary: bool,
}

impl NewAddress {
    pub fn new(
        state: impl Into<String>,
        district: impl Into<String>,
        pin_code: impl Into<String>,
    ) -> Self {
        Self {
            branch_id: None,
            address_type: AddressType::default(),
            label: None,
            address_line_1: None,
            address_line_2: None,
            city: None,
            district: district.into(),
            state: state.into(),
            country: None,
            pin_code: pin_code.into(),
            latitude: None,
            longitude: None,
            is_primary: false,
        }
    }

    pub fn with_location(mut self, point: GeoPoint) -> Self {
        self.latitude = Some(point.latitude);
        self.longitude = Some(point.longitude);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AddressPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_type: Option<AddressType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_line_1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_line_2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,
}

impl AddressPatch {
    pub fn apply_to(&self, address: &mut Address) {
        if let Some(address_type) = self.address_type {
            address.address_type = address_type;
        }
        if let Some(label) = &self.label {
            address.label = Some(label.clone());
        }
        if let Some(line) = &self.address_line_1 {
            address.address_line_1 = Some(line.clone());
        }
        if let Some(line) = &self.address_line_2 {
            address.address_line_2 = Some(line.clone());
        }
        if let Some(city) = &self.city {
            address.city = Some(city.clone());
        }
        if let Some(district) = &self.district {
            address.district = district.clone();
        }
        if let Some(state) = &self.state {
            address.state = state.clone();
        }
        if let Some(country) = &self.country {
            address.country = country.clone();
        }
        if let Some(pin_code) = &self.pin_code {
            address.pin_code = pin_code.clone();
        }
        if let Some(lat) = self.latitude {
            address.latitude = Some(lat);
        }
        if let Some(lon) = self.longitude {
            address.longitude = Some(lon);
        }
        if let Some(is_primary) = self.is_primary {
            address.is_primary = is_primary;
        }
    }
}

impl HasUpdates for AddressPatch {
    fn has_any_updates(&self) -> bool {
        self.address_type.is_some()
            || self.label.is_some()
            || self.address_line_1.is_some()
            || self.address_line_2.is_some()
            || self.city.is_some()
            || self.district.is_some()
            || self.state.is_some()
            || self.country.is_some()
            || self.pin_code.is_some()
            || self.latitude.is_some()
            || self.longitude.is_some()
            || self.is_primary.is_some()
    }
}

#[allow(clippy::too_many_arguments)]
fn check_address_fields(
    errors: &mut ValidationErrors,
    label: Option<&str>,
    line_1: Option<&str>,
    line_2: Option<&str>,
    city: Option<&str>,
    district: Option<&str>,
    state: Option<&str>,
    country: Option<&str>,
    pin_code: Option<&str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
) {
    errors.check(validation::optional(label, |v| {
        validation::length("label", v, 0, LABEL_MAX)
    }));
    errors.check(validation::optional(line_1, |v| {
        validation::length("address_line_1", v, 0, ADDRESS_LINE_MAX)
    }));
    errors.check(validation::optional(line_2, |v| {
        validation::length("address_line_2", v, 0, ADDRESS_LINE_MAX)
    }));
    errors.check(validation::optional(city, |v| {
        validation::length("city", v, 0, REGION_MAX)
    }));
    errors.check(validation::optional(district, |v| {
        validation::required("district", v)?;
        validation::length("district", v, REGION_MIN, REGION_MAX)
    }));
    errors.check(validation::optional(state, |v| {
        validation::required("state", v)?;
        validation::length("state", v, REGION_MIN, REGION_MAX)
    }));
    errors.check(validation::optional(country, |v| {
        validation::length("country", v, REGION_MIN, REGION_MAX)
    }));
    errors.check(validation::optional(pin_code, |v| {
        validation::pin_code("pin_code", v)
    }));
    if let Some(lat) = latitude {
        errors.check(validation::latitude("latitude", lat));
    }
    if let Some(lon) = longitude {
        errors.check(validation::longitude("longitude", lon));
    }
}

impl Validate for NewAddress {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        check_address_fields(
            &mut errors,
            self.label.as_deref(),
            self.address_line_1.as_deref(),
            self.address_line_2.as_deref(),
            self.city.as_deref(),
            Some(&self.district),
            Some(&self.state),
            self.country.as_deref(),
            Some(&self.pin_code),
            self.latitude,
            self.longitude,
        );
        if self.latitude.is_some() != self.longitude.is_some() {
            let missing = if self.latitude.is_none() {
                "latitude"
            } else {
                "longitude"
            };
            errors.push(FieldError::new(
                missing,
                FieldErrorCode::Required,
                "latitude and longitude must be provided together",
            ));
        }
        errors.into_result()
    }
}

impl Validate for AddressPatch {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        errors.check(self.validate_has_updates());
        check_address_fields(
            &mut errors,
            self.label.as_deref(),
            self.address_line_1.as_deref(),
            self.address_line_2.as_deref(),
            self.city.as_deref(),
            self.district.as_deref(),
            self.state.as_deref(),
            self.country.as_deref(),
            self.pin_code.as_deref(),
            self.latitude,
            self.longitude,
        );
        errors.into_result()
    }
}

// ============================================================================
// COMMENT
// ============================================================================

/// A comment on a post, optionally replying to another comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub is_edited: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewComment {
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub content: String,
}

impl NewComment {
    pub fn new(post_id: PostId, content: impl Into<String>) -> Self {
        Self {
            post_id,
            parent_id: None,
            content: content.into(),
        }
    }

    pub fn reply_to(mut self, parent_id: CommentId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CommentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl CommentPatch {
    pub fn apply_to(&self, comment: &mut Comment) {
        if let Some(content) = &self.content {
            comment.content = content.clone();
            comment.is_edited = true;
        }
    }
}

impl HasUpdates for CommentPatch {
    fn has_any_updates(&self) -> bool {
        self.content.is_some()
    }
}

fn check_comment_content(content: &str) -> Result<(), FieldError> {
    validation::required("content", content)?;
    validation::length("content", content, 1, COMMENT_MAX)
}

impl Validate for NewComment {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        if self.post_id.is_blank() {
            errors.push(FieldError::new(
                "post_id",
                FieldErrorCode::Required,
                "is required",
            ));
        }
        errors.check(check_comment_content(&self.content));
        errors.into_result()
    }
}

impl Validate for CommentPatch {
    fn validate(&self) -> DeskResult<()> {
        let mut errors = ValidationErrors::new();
        errors.check(self.validate_has_updates());
        errors.check(validation::optional(self.content.as_deref(), check_comment_content));
        errors.into_result()
    }
}
