//! CoachDesk Core - Domain Types
//!
//! Pure data structures shared by every CoachDesk crate: typed identifiers,
//! entity records with their draft/patch payloads, the error taxonomy,
//! field validation, search filters, sessions and configuration.
//! This crate performs no I/O.

pub mod config;
pub mod entities;
pub mod enums;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod geo;
pub mod identity;
pub mod session;
pub mod validation;

pub use config::{BackendConfig, MutationPolicy, StoreConfig};
pub use entities::{
    Address, AddressPatch, Comment, CommentPatch, CoachingBranch, CoachingCenter, BranchPatch,
    CenterPatch, NewAddress, NewBranch, NewCenter, NewComment,
};
pub use enums::{AddressType, CenterCategory, CenterStatus, EntityType, UserRole};
pub use envelope::Outcome;
pub use error::{ConfigError, DeskError, DeskResult, FieldError, FieldErrorCode, ValidationErrors};
pub use filter::{
    AddressFilters, AddressSortField, BranchFilters, BranchSortField, CenterFilters,
    CenterSortField, CommentFilters, CommentSortField, SearchPage, SearchQuery, SearchWindow,
    SortDirection, SortField, SortSpec, DEFAULT_PER_PAGE,
};
pub use geo::{haversine_km, GeoPoint, GeoRadius};
pub use identity::{
    AddressId, BranchId, CenterId, CommentId, EntityKey, PostId, Timestamp, UserId,
};
pub use session::{AccessToken, Session};
pub use validation::{HasUpdates, Validate};
