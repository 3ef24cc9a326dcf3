//! Search filters, sort specs and result windows.

use crate::error::{DeskError, DeskResult};
use crate::geo::GeoRadius;
use crate::{
    AddressType, BranchId, CenterCategory, CenterId, CenterStatus, CommentId, PostId, UserId,
};
use serde::{Deserialize, Serialize};

/// Page size used when a query does not name one.
pub const DEFAULT_PER_PAGE: u32 = 20;

// ============================================================================
// SORTING
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// Apply this direction to an ascending ordering.
    pub fn apply(&self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// A sortable column of an entity family.
pub trait SortField: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    /// Backend column name, `None` when the ordering is computed client-side.
    fn column(&self) -> Option<&'static str>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec<S> {
    pub field: S,
    pub direction: SortDirection,
}

impl<S> SortSpec<S> {
    pub fn asc(field: S) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: S) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CenterSortField {
    Name,
    #[default]
    CreatedAt,
    RatingAverage,
    EstablishedYear,
}

impl SortField for CenterSortField {
    fn column(&self) -> Option<&'static str> {
        Some(match self {
            Self::Name => "name",
            Self::CreatedAt => "created_at",
            Self::RatingAverage => "rating_average",
            Self::EstablishedYear => "established_year",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum BranchSortField {
    Name,
    #[default]
    CreatedAt,
}

impl SortField for BranchSortField {
    fn column(&self) -> Option<&'static str> {
        Some(match self {
            Self::Name => "name",
            Self::CreatedAt => "created_at",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AddressSortField {
    #[default]
    CreatedAt,
    State,
    PinCode,
    /// Distance from the `near` point of the filters; nearest first when ascending.
    Distance,
}

impl SortField for AddressSortField {
    fn column(&self) -> Option<&'static str> {
        match self {
            Self::CreatedAt => Some("created_at"),
            Self::State => Some("state"),
            Self::PinCode => Some("pin_code"),
            Self::Distance => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CommentSortField {
    #[default]
    CreatedAt,
    LikeCount,
}

impl SortField for CommentSortField {
    fn column(&self) -> Option<&'static str> {
        Some(match self {
            Self::CreatedAt => "created_at",
            Self::LikeCount => "like_count",
        })
    }
}

// ============================================================================
// FILTERS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CenterFilters {
    /// Case-insensitive substring of the center name.
    pub search: Option<String>,
    pub category: Option<CenterCategory>,
    pub status: Option<CenterStatus>,
    pub owner_id: Option<UserId>,
    /// Exact (case-insensitive) subject the center must teach.
    pub subject: Option<String>,
    pub is_verified: Option<bool>,
    pub min_rating: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BranchFilters {
    pub center_id: Option<CenterId>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub is_main_branch: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AddressFilters {
    pub user_id: Option<UserId>,
    pub branch_id: Option<BranchId>,
    pub address_type: Option<AddressType>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub pin_code: Option<String>,
    pub is_primary: Option<bool>,
    /// Only addresses with coordinates inside this circle.
    pub near: Option<GeoRadius>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CommentFilters {
    pub post_id: Option<PostId>,
    pub author_id: Option<UserId>,
    pub parent_id: Option<CommentId>,
    /// Exclude replies.
    #[serde(default)]
    pub top_level_only: bool,
}

// ============================================================================
// QUERIES AND RESULTS
// ============================================================================

/// A filtered, sorted, paginated search request. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery<F, S> {
    pub filters: F,
    pub sort: SortSpec<S>,
    pub page: u32,
    pub per_page: u32,
}

impl<F: Default, S: Default> Default for SearchQuery<F, S> {
    fn default() -> Self {
        Self::new(F::default())
    }
}

impl<F, S: Default> SearchQuery<F, S> {
    pub fn new(filters: F) -> Self {
        Self {
            filters,
            sort: SortSpec::default(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl<F, S> SearchQuery<F, S> {
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn sorted_by(mut self, sort: SortSpec<S>) -> Self {
        self.sort = sort;
        self
    }

    /// Zero-based index of the first item on this page.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.per_page as usize)
    }

    /// Check pagination bounds before a query is issued.
    ///
    /// # Errors
    /// Returns `DeskError::InvalidQuery` when `page < 1` or `per_page` is
    /// outside `1..=max_per_page`.
    pub fn validate(&self, max_per_page: u32) -> DeskResult<()> {
        if self.page < 1 {
            return Err(DeskError::InvalidQuery {
                reason: "page must be at least 1".to_string(),
            });
        }
        if self.per_page < 1 || self.per_page > max_per_page {
            return Err(DeskError::InvalidQuery {
                reason: format!("per_page must be between 1 and {}", max_per_page),
            });
        }
        Ok(())
    }
}

/// One page of results as returned by a backend, with the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

impl<T> SearchPage<T> {
    pub fn new(items: Vec<T>, total_count: u64) -> Self {
        Self { items, total_count }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> SearchPage<U> {
        SearchPage {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
        }
    }
}

/// The current page of a search projection.
///
/// `has_more` is always derived from the counts, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchWindow<T> {
    items: Vec<T>,
    total_count: u64,
    page: u32,
    per_page: u32,
}

impl<T> SearchWindow<T> {
    /// Build a window, truncating `items` to `per_page`.
    pub fn new(mut items: Vec<T>, total_count: u64, page: u32, per_page: u32) -> Self {
        items.truncate(per_page as usize);
        Self {
            items,
            total_count,
            page,
            per_page,
        }
    }

    pub fn from_page(page: SearchPage<T>, page_number: u32, per_page: u32) -> Self {
        Self::new(page.items, page.total_count, page_number, per_page)
    }

    pub fn empty(page: u32, per_page: u32) -> Self {
        Self::new(Vec::new(), 0, page, per_page)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn has_more(&self) -> bool {
        self.total_count > u64::from(self.page) * u64::from(self.per_page)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for SearchWindow<T> {
    fn default() -> Self {
        Self::empty(1, DEFAULT_PER_PAGE)
    }
}
