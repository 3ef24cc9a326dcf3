//! CoachDesk Store - Entity Cache & Optimistic Mutation Store
//!
//! One generic store, instantiated per entity family:
//! - `KeyedCache`: id-keyed snapshots with single-flight fetches and a
//!   token-based stale-write guard
//! - `MutationEngine`: optimistic create/update/delete with revert by reload
//! - `SearchProjection`: the active query and its result window
//! - `Selectors`: read-only views with stable empty defaults
//!
//! Backends plug in through `RemoteAccessor`; `InMemoryBackend` and
//! `RestAccessor` are provided.

pub mod accessor;
pub mod entity;
pub mod keyed_cache;
pub mod memory;
pub mod mutation;
pub mod preferences;
pub mod projection;
pub mod rest;
pub mod selectors;
pub mod service;
pub mod state;
pub mod telemetry;

pub use accessor::{require_id, EntityQuery, RemoteAccessor};
pub use entity::StoreEntity;
pub use keyed_cache::{CacheStats, KeyedCache};
pub use memory::{InMemoryBackend, Operation, ServerRecord};
pub use mutation::MutationEngine;
pub use preferences::{
    InMemoryPreferences, JsonFilePreferences, PreferenceError, PreferenceStore, SavedSearch,
};
pub use projection::{EntityWindow, ProjectionState, SearchProjection};
pub use rest::{
    map_status, paginate_locally, parse_content_range, rest_accessors, RestAccessor, RestClient,
    RestResource,
};
pub use selectors::{Selection, Selectors};
pub use service::{outcome, Accessors, CoachDesk, DynAccessor, EntityStore};
pub use state::{
    reduce, Action, CacheEntry, CacheState, EntryStatus, GroupEntry, MutationPhase, Settlement,
};
pub use telemetry::{init_tracing, TelemetryConfig};
