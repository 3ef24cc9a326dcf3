//! The entity trait the generic store is parameterised by, and its four
//! instantiations.

use std::cmp::Ordering;
use std::fmt::Debug;

use coachdesk_core::{
    Address, AddressFilters, AddressPatch, AddressSortField, BranchFilters, BranchPatch,
    BranchSortField, CenterFilters, CenterId, CenterPatch, CenterSortField, CoachingBranch,
    CoachingCenter, Comment, CommentFilters, CommentPatch, CommentSortField, EntityKey,
    EntityType, NewAddress, NewBranch, NewCenter, NewComment, PostId, SortField, UserId,
    Validate,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// An entity family the store can cache, search and mutate.
///
/// Implementations describe how records are identified, grouped under a
/// parent, filtered and sorted, and how a confirmed write affects sibling
/// records of the same group.
pub trait StoreEntity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Id: EntityKey;
    /// Key of the parent group this entity is listed under.
    type GroupKey: EntityKey;
    type Draft: Validate + Serialize + Clone + Debug + Send + Sync + 'static;
    type Patch: Validate + Serialize + Clone + Debug + Send + Sync + 'static;
    type Filters: Clone
        + Debug
        + Default
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type SortField: SortField + Default + Serialize + DeserializeOwned;

    const ENTITY_TYPE: EntityType;

    /// Backend table holding this entity family.
    const TABLE: &'static str;

    fn id(&self) -> &Self::Id;

    fn group_key(&self) -> Option<Self::GroupKey>;

    /// Filters selecting every member of a group.
    fn group_filters(key: &Self::GroupKey) -> Self::Filters;

    /// Overwrite fields with those set in the patch.
    fn apply_patch(&mut self, patch: &Self::Patch);

    fn matches(&self, filters: &Self::Filters) -> bool;

    /// Ascending ordering of two records by a sort field.
    fn compare(&self, other: &Self, field: Self::SortField, filters: &Self::Filters) -> Ordering;

    /// The sibling as it must look after `confirmed` was written, or `None`
    /// if the sibling is unaffected. The backend adjusts siblings in the same
    /// write, so an adjusted sibling carries `confirmed`'s update time.
    fn reconcile_sibling(_confirmed: &Self, _sibling: &Self) -> Option<Self> {
        None
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn opt_eq<T: PartialEq>(filter: &Option<T>, value: &T) -> bool {
    filter.as_ref().map(|f| f == value).unwrap_or(true)
}

// ============================================================================
// COACHING CENTER
// ============================================================================

impl StoreEntity for CoachingCenter {
    type Id = CenterId;
    type GroupKey = UserId;
    type Draft = NewCenter;
    type Patch = CenterPatch;
    type Filters = CenterFilters;
    type SortField = CenterSortField;

    const ENTITY_TYPE: EntityType = EntityType::CoachingCenter;
    const TABLE: &'static str = "coaching_centers";

    fn id(&self) -> &CenterId {
        &self.id
    }

    fn group_key(&self) -> Option<UserId> {
        Some(self.owner_id.clone())
    }

    fn group_filters(key: &UserId) -> CenterFilters {
        CenterFilters {
            owner_id: Some(key.clone()),
            ..Default::default()
        }
    }

    fn apply_patch(&mut self, patch: &CenterPatch) {
        patch.apply_to(self);
    }

    fn matches(&self, filters: &CenterFilters) -> bool {
        if let Some(search) = &filters.search {
            if !contains_ignore_case(&self.name, search) {
                return false;
            }
        }
        if let Some(subject) = &filters.subject {
            if !self.subjects.iter().any(|s| eq_ignore_case(s, subject)) {
                return false;
            }
        }
        if let Some(min) = filters.min_rating {
            if self.rating_average < min {
                return false;
            }
        }
        opt_eq(&filters.category, &self.category)
            && opt_eq(&filters.status, &self.status)
            && opt_eq(&filters.owner_id, &self.owner_id)
            && opt_eq(&filters.is_verified, &self.is_verified)
    }

    fn compare(&self, other: &Self, field: CenterSortField, _filters: &CenterFilters) -> Ordering {
        match field {
            CenterSortField::Name => self.name.to_lowercase().cmp(&other.name.to_lowercase()),
            CenterSortField::CreatedAt => self.created_at.cmp(&other.created_at),
            CenterSortField::RatingAverage => self
                .rating_average
                .partial_cmp(&other.rating_average)
                .unwrap_or(Ordering::Equal),
            CenterSortField::EstablishedYear => self.established_year.cmp(&other.established_year),
        }
    }
}

// ============================================================================
// COACHING BRANCH
// ============================================================================

impl StoreEntity for CoachingBranch {
    type Id = coachdesk_core::BranchId;
    type GroupKey = CenterId;
    type Draft = NewBranch;
    type Patch = BranchPatch;
    type Filters = BranchFilters;
    type SortField = BranchSortField;

    const ENTITY_TYPE: EntityType = EntityType::CoachingBranch;
    const TABLE: &'static str = "coaching_branches";

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn group_key(&self) -> Option<CenterId> {
        Some(self.center_id.clone())
    }

    fn group_filters(key: &CenterId) -> BranchFilters {
        BranchFilters {
            center_id: Some(key.clone()),
            ..Default::default()
        }
    }

    fn apply_patch(&mut self, patch: &BranchPatch) {
        patch.apply_to(self);
    }

    fn matches(&self, filters: &BranchFilters) -> bool {
        if let Some(search) = &filters.search {
            if !contains_ignore_case(&self.name, search) {
                return false;
            }
        }
        opt_eq(&filters.center_id, &self.center_id)
            && opt_eq(&filters.is_active, &self.is_active)
            && opt_eq(&filters.is_main_branch, &self.is_main_branch)
    }

    fn compare(&self, other: &Self, field: BranchSortField, _filters: &BranchFilters) -> Ordering {
        match field {
            BranchSortField::Name => self.name.to_lowercase().cmp(&other.name.to_lowercase()),
            BranchSortField::CreatedAt => self.created_at.cmp(&other.created_at),
        }
    }

    /// A center has at most one main branch.
    fn reconcile_sibling(confirmed: &Self, sibling: &Self) -> Option<Self> {
        if confirmed.is_main_branch
            && sibling.is_main_branch
            && sibling.id != confirmed.id
            && sibling.center_id == confirmed.center_id
        {
            let mut demoted = sibling.clone();
            demoted.is_main_branch = false;
            demoted.updated_at = confirmed.updated_at;
            return Some(demoted);
        }
        None
    }
}

// ============================================================================
// ADDRESS
// ============================================================================

impl StoreEntity for Address {
    type Id = coachdesk_core::AddressId;
    type GroupKey = UserId;
    type Draft = NewAddress;
    type Patch = AddressPatch;
    type Filters = AddressFilters;
    type SortField = AddressSortField;

    const ENTITY_TYPE: EntityType = EntityType::Address;
    const TABLE: &'static str = "addresses";

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn group_key(&self) -> Option<UserId> {
        self.user_id.clone()
    }

    fn group_filters(key: &UserId) -> AddressFilters {
        AddressFilters {
            user_id: Some(key.clone()),
            ..Default::default()
        }
    }

    fn apply_patch(&mut self, patch: &AddressPatch) {
        patch.apply_to(self);
    }

    fn matches(&self, filters: &AddressFilters) -> bool {
        if let Some(user_id) = &filters.user_id {
            if self.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(branch_id) = &filters.branch_id {
            if self.branch_id.as_ref() != Some(branch_id) {
                return false;
            }
        }
        if let Some(state) = &filters.state {
            if !eq_ignore_case(&self.state, state) {
                return false;
            }
        }
        if let Some(district) = &filters.district {
            if !eq_ignore_case(&self.district, district) {
                return false;
            }
        }
        if let Some(radius) = &filters.near {
            match self.location() {
                Some(point) if radius.contains(&point) => {}
                _ => return false,
            }
        }
        opt_eq(&filters.address_type, &self.address_type)
            && opt_eq(&filters.pin_code, &self.pin_code)
            && opt_eq(&filters.is_primary, &self.is_primary)
    }

    fn compare(&self, other: &Self, field: AddressSortField, filters: &AddressFilters) -> Ordering {
        match field {
            AddressSortField::CreatedAt => self.created_at.cmp(&other.created_at),
            AddressSortField::State => self.state.to_lowercase().cmp(&other.state.to_lowercase()),
            AddressSortField::PinCode => self.pin_code.cmp(&other.pin_code),
            AddressSortField::Distance => {
                let Some(origin) = filters.near.map(|r| r.center) else {
                    return Ordering::Equal;
                };
                // Records without coordinates sort after every located record.
                let da = self.location().map(|p| origin.distance_km(&p));
                let db = other.location().map(|p| origin.distance_km(&p));
                match (da, db) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        }
    }

    /// A user (or a branch) has at most one primary address.
    fn reconcile_sibling(confirmed: &Self, sibling: &Self) -> Option<Self> {
        if !confirmed.is_primary || !sibling.is_primary || sibling.id == confirmed.id {
            return None;
        }
        let same_user = confirmed.user_id.is_some() && confirmed.user_id == sibling.user_id;
        let same_branch = confirmed.branch_id.is_some() && confirmed.branch_id == sibling.branch_id;
        if same_user || same_branch {
            let mut demoted = sibling.clone();
            demoted.is_primary = false;
            demoted.updated_at = confirmed.updated_at;
            return Some(demoted);
        }
        None
    }
}

// ============================================================================
// COMMENT
// ============================================================================

impl StoreEntity for Comment {
    type Id = coachdesk_core::CommentId;
    type GroupKey = PostId;
    type Draft = NewComment;
    type Patch = CommentPatch;
    type Filters = CommentFilters;
    type SortField = CommentSortField;

    const ENTITY_TYPE: EntityType = EntityType::Comment;
    const TABLE: &'static str = "comments";

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn group_key(&self) -> Option<PostId> {
        Some(self.post_id.clone())
    }

    fn group_filters(key: &PostId) -> CommentFilters {
        CommentFilters {
            post_id: Some(key.clone()),
            ..Default::default()
        }
    }

    fn apply_patch(&mut self, patch: &CommentPatch) {
        patch.apply_to(self);
    }

    fn matches(&self, filters: &CommentFilters) -> bool {
        if filters.top_level_only && self.parent_id.is_some() {
            return false;
        }
        if let Some(parent_id) = &filters.parent_id {
            if self.parent_id.as_ref() != Some(parent_id) {
                return false;
            }
        }
        opt_eq(&filters.post_id, &self.post_id) && opt_eq(&filters.author_id, &self.author_id)
    }

    fn compare(&self, other: &Self, field: CommentSortField, _filters: &CommentFilters) -> Ordering {
        match field {
            CommentSortField::CreatedAt => self.created_at.cmp(&other.created_at),
            CommentSortField::LikeCount => self.like_count.cmp(&other.like_count),
        }
    }
}
