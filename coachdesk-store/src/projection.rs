//! Search projection: the active query of an entity family and its result
//! window.
//!
//! The projection keeps one active query. Every `search` replaces it and
//! takes a fresh token; a response that arrives after a newer search was
//! issued is returned to its caller but never stored. Result items are
//! written into the keyed cache so entity views stay coherent with lists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coachdesk_core::{DeskError, DeskResult, SearchWindow, Session};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::accessor::{EntityQuery, RemoteAccessor};
use crate::entity::StoreEntity;
use crate::keyed_cache::KeyedCache;
use crate::preferences::{PreferenceError, PreferenceStore, SavedSearch};
use crate::state::EntryStatus;

/// Result window of a projection, holding shared records.
pub type EntityWindow<E> = SearchWindow<Arc<E>>;

/// Snapshot of a projection.
#[derive(Debug)]
pub struct ProjectionState<E: StoreEntity> {
    pub query: Option<EntityQuery<E>>,
    pub window: Option<Arc<EntityWindow<E>>>,
    pub status: EntryStatus,
    pub token: u64,
}

impl<E: StoreEntity> Clone for ProjectionState<E> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            window: self.window.clone(),
            status: self.status.clone(),
            token: self.token,
        }
    }
}

impl<E: StoreEntity> Default for ProjectionState<E> {
    fn default() -> Self {
        Self {
            query: None,
            window: None,
            status: EntryStatus::Idle,
            token: 0,
        }
    }
}

pub struct SearchProjection<E: StoreEntity, A> {
    cache: KeyedCache<E, A>,
    state: watch::Sender<Arc<ProjectionState<E>>>,
    tokens: AtomicU64,
    preferences: Option<Arc<dyn PreferenceStore>>,
}

impl<E: StoreEntity, A: RemoteAccessor<E>> SearchProjection<E, A> {
    pub fn new(cache: KeyedCache<E, A>, preferences: Option<Arc<dyn PreferenceStore>>) -> Self {
        let (state, _) = watch::channel(Arc::new(ProjectionState::default()));
        Self {
            cache,
            state,
            tokens: AtomicU64::new(0),
            preferences,
        }
    }

    pub fn snapshot(&self) -> Arc<ProjectionState<E>> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ProjectionState<E>>> {
        self.state.subscribe()
    }

    pub fn active_query(&self) -> Option<EntityQuery<E>> {
        self.state.borrow().query.clone()
    }

    /// A new query with default filters and the configured page size.
    pub fn default_query(&self) -> EntityQuery<E> {
        EntityQuery::<E>::new(E::Filters::default())
            .with_per_page(self.cache.config().default_per_page)
    }

    /// The last persisted filters and sort as a first-page query. A saved
    /// page size is clamped to the configured maximum.
    pub fn saved_query(&self) -> Option<EntityQuery<E>> {
        let prefs = self.preferences.as_ref()?;
        let value = match prefs.load(E::TABLE) {
            Ok(value) => value?,
            Err(error) => {
                warn!(entity = %E::ENTITY_TYPE, %error, "could not load saved search");
                return None;
            }
        };
        match serde_json::from_value::<SavedSearch<E::Filters, E::SortField>>(value) {
            Ok(saved) => {
                let max = self.cache.config().max_per_page;
                let per_page = saved.per_page.min(max).max(1);
                if per_page != saved.per_page {
                    warn!(
                        entity = %E::ENTITY_TYPE,
                        saved = saved.per_page,
                        per_page,
                        "saved page size outside configured bounds"
                    );
                }
                Some(
                    EntityQuery::<E>::new(saved.filters)
                        .sorted_by(saved.sort)
                        .with_per_page(per_page),
                )
            }
            Err(error) => {
                warn!(entity = %E::ENTITY_TYPE, %error, "ignoring unreadable saved search");
                None
            }
        }
    }

    /// Run a query, replacing the active one.
    ///
    /// # Errors
    /// `InvalidQuery` for out-of-range pagination (nothing changes), or the
    /// accessor's error, which is also recorded in the projection state.
    pub async fn search(
        &self,
        session: &Session,
        query: EntityQuery<E>,
    ) -> DeskResult<Arc<EntityWindow<E>>> {
        query.validate(self.cache.config().max_per_page)?;
        let token = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;

        self.state.send_modify(|state| {
            *state = Arc::new(ProjectionState {
                query: Some(query.clone()),
                window: state.window.clone(),
                status: EntryStatus::Loading,
                token,
            });
        });
        self.persist(&query);
        debug!(entity = %E::ENTITY_TYPE, token, page = query.page, "search issued");

        let result = self.cache.accessor().search(session, &query).await;
        let latest = self.state.borrow().token == token;

        match result {
            Ok(page) => {
                let window = Arc::new(SearchWindow::from_page(
                    page.map(Arc::new),
                    query.page,
                    query.per_page,
                ));
                if !latest {
                    debug!(entity = %E::ENTITY_TYPE, token, "discarded out-of-order search response");
                    return Ok(window);
                }
                self.cache.upsert_shared(window.items().to_vec());
                let stored = self.state.send_if_modified(|state| {
                    if state.token != token {
                        return false;
                    }
                    *state = Arc::new(ProjectionState {
                        query: Some(query.clone()),
                        window: Some(Arc::clone(&window)),
                        status: EntryStatus::Idle,
                        token,
                    });
                    true
                });
                if stored {
                    debug!(
                        entity = %E::ENTITY_TYPE,
                        token,
                        total = window.total_count(),
                        has_more = window.has_more(),
                        "search stored"
                    );
                }
                Ok(window)
            }
            Err(error) => {
                warn!(entity = %E::ENTITY_TYPE, token, %error, "search failed");
                self.state.send_if_modified(|state| {
                    if state.token != token {
                        return false;
                    }
                    *state = Arc::new(ProjectionState {
                        query: Some(query.clone()),
                        window: None,
                        status: EntryStatus::Failed(error.clone()),
                        token,
                    });
                    true
                });
                Err(error)
            }
        }
    }

    /// Load the page after the current window. Returns the current window
    /// unchanged when there is nothing more.
    ///
    /// Without a settled window for the active query (its load failed or is
    /// still running) the active query itself is run again, so a page that
    /// never arrived is not skipped.
    pub async fn next_page(&self, session: &Session) -> DeskResult<Arc<EntityWindow<E>>> {
        let (query, window) = {
            let state = self.state.borrow();
            let window = match state.status {
                EntryStatus::Idle => state.window.clone(),
                _ => None,
            };
            (state.query.clone(), window)
        };
        let Some(query) = query else {
            return Err(no_active_search());
        };
        match window {
            Some(window) if !window.has_more() => Ok(window),
            Some(window) => {
                let next = window.page() + 1;
                self.search(session, query.with_page(next)).await
            }
            None => {
                debug!(entity = %E::ENTITY_TYPE, page = query.page, "retrying unsettled page");
                self.search(session, query).await
            }
        }
    }

    /// Re-run the active query.
    pub async fn refresh(&self, session: &Session) -> DeskResult<Arc<EntityWindow<E>>> {
        let query = self.active_query().ok_or_else(no_active_search)?;
        self.search(session, query).await
    }

    /// Forget the active query and window. Responses still in flight are
    /// discarded when they land.
    pub fn reset(&self) {
        let token = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| {
            *state = Arc::new(ProjectionState {
                token,
                ..ProjectionState::default()
            });
        });
        if let Some(prefs) = &self.preferences {
            if let Err(error) = prefs.remove(E::TABLE) {
                warn!(entity = %E::ENTITY_TYPE, %error, "could not clear saved search");
            }
        }
    }

    fn persist(&self, query: &EntityQuery<E>) {
        let Some(prefs) = &self.preferences else {
            return;
        };
        let saved = SavedSearch {
            filters: query.filters.clone(),
            sort: query.sort,
            per_page: query.per_page,
        };
        let result = serde_json::to_value(&saved)
            .map_err(PreferenceError::from)
            .and_then(|value| prefs.save(E::TABLE, value));
        if let Err(error) = result {
            warn!(entity = %E::ENTITY_TYPE, %error, "could not persist search preferences");
        }
    }
}

fn no_active_search() -> DeskError {
    DeskError::InvalidQuery {
        reason: "no active search".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, Operation};
    use crate::preferences::InMemoryPreferences;
    use chrono::{Duration, Utc};
    use coachdesk_core::{
        CenterCategory, CenterFilters, CenterId, CenterSortField, CenterStatus, CoachingCenter,
        SortSpec, StoreConfig, UserId,
    };

    type Backend = Arc<InMemoryBackend<CoachingCenter>>;

    fn centers(n: usize) -> Vec<CoachingCenter> {
        let base = Utc::now();
        (0..n)
            .map(|i| CoachingCenter {
                id: CenterId::from(format!("c-{:03}", i)),
                owner_id: UserId::from("owner-1"),
                name: format!("Center {:03}", i),
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
                created_at: base + Duration::seconds(i as i64),
                updated_at: base,
            })
            .collect()
    }

    fn projection(
        n: usize,
        prefs: Option<Arc<dyn PreferenceStore>>,
    ) -> (SearchProjection<CoachingCenter, Backend>, Backend) {
        let backend: Backend = Arc::new(InMemoryBackend::with_records(centers(n)));
        let cache = KeyedCache::new(backend.clone(), StoreConfig::default());
        (SearchProjection::new(cache, prefs), backend)
    }

    #[tokio::test]
    async fn test_invalid_pagination_issues_no_call() {
        let (projection, backend) = projection(5, None);
        let session = Session::anonymous();
        let err = projection
            .search(&session, projection.default_query().with_page(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidQuery { .. }));
        let err = projection
            .search(&session, projection.default_query().with_per_page(101))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidQuery { .. }));
        assert_eq!(backend.calls(Operation::Search), 0);
        assert!(projection.active_query().is_none());
    }

    #[tokio::test]
    async fn test_search_populates_cache() {
        let (projection, _backend) = projection(5, None);
        let window = projection
            .search(&Session::anonymous(), projection.default_query())
            .await
            .unwrap();
        assert_eq!(window.len(), 5);
        assert!(!window.has_more());
        for item in window.items() {
            assert!(projection.cache.peek(&item.id).is_some());
        }
    }

    #[tokio::test]
    async fn test_next_page_walks_to_the_end() {
        let (projection, backend) = projection(45, None);
        let session = Session::anonymous();
        let query = projection
            .default_query()
            .sorted_by(SortSpec::asc(CenterSortField::Name));
        projection.search(&session, query).await.unwrap();
        let second = projection.next_page(&session).await.unwrap();
        assert_eq!(second.page(), 2);
        assert!(second.has_more());
        let third = projection.next_page(&session).await.unwrap();
        assert_eq!(third.len(), 5);
        assert!(!third.has_more());

        let again = projection.next_page(&session).await.unwrap();
        assert!(Arc::ptr_eq(&again, &third));
        assert_eq!(backend.calls(Operation::Search), 3);
    }

    #[tokio::test]
    async fn test_next_page_retries_a_failed_page() {
        let (projection, backend) = projection(45, None);
        let session = Session::anonymous();
        let query = projection
            .default_query()
            .sorted_by(SortSpec::asc(CenterSortField::Name));
        projection.search(&session, query).await.unwrap();

        backend.fail_next(Operation::Search, DeskError::backend("down"));
        assert!(projection.next_page(&session).await.is_err());

        let second = projection.next_page(&session).await.unwrap();
        assert_eq!(second.page(), 2);
        assert_eq!(second.items()[0].name, "Center 020");
        let third = projection.next_page(&session).await.unwrap();
        assert_eq!(third.page(), 3);
        assert_eq!(backend.calls(Operation::Search), 4);
    }

    #[tokio::test]
    async fn test_saved_page_size_is_clamped_to_config() {
        let prefs: Arc<dyn PreferenceStore> = Arc::new(InMemoryPreferences::new());
        let (projection, _backend) = projection(3, Some(prefs.clone()));
        projection
            .search(&Session::anonymous(), projection.default_query().with_per_page(80))
            .await
            .unwrap();

        let backend: Backend = Arc::new(InMemoryBackend::with_records(centers(3)));
        let config = StoreConfig {
            max_per_page: 25,
            default_per_page: 20,
            ..StoreConfig::default()
        };
        let narrower = SearchProjection::new(KeyedCache::new(backend, config), Some(prefs));
        let saved = narrower.saved_query().unwrap();
        assert_eq!(saved.per_page, 25);
        let window = narrower.search(&Session::anonymous(), saved).await.unwrap();
        assert_eq!(window.len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_without_query_is_invalid() {
        let (projection, _backend) = projection(1, None);
        let err = projection.refresh(&Session::anonymous()).await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_failed_search_is_recorded() {
        let (projection, backend) = projection(3, None);
        backend.fail_next(Operation::Search, DeskError::backend("down"));
        let err = projection
            .search(&Session::anonymous(), projection.default_query())
            .await
            .unwrap_err();
        let state = projection.snapshot();
        assert_eq!(state.status.error(), Some(&err));
        assert!(state.window.is_none());
    }

    #[tokio::test]
    async fn test_preferences_follow_the_active_query() {
        let prefs: Arc<dyn PreferenceStore> = Arc::new(InMemoryPreferences::new());
        let (projection, _backend) = projection(3, Some(prefs.clone()));
        let query = projection.default_query().with_per_page(10).sorted_by(SortSpec::asc(
            CenterSortField::Name,
        ));
        let query = EntityQuery::<CoachingCenter> {
            filters: CenterFilters {
                category: Some(CenterCategory::SchoolCoaching),
                ..Default::default()
            },
            ..query
        };
        projection
            .search(&Session::anonymous(), query.clone().with_page(2))
            .await
            .unwrap();

        let saved = projection.saved_query().unwrap();
        assert_eq!(saved.filters, query.filters);
        assert_eq!(saved.sort, query.sort);
        assert_eq!(saved.per_page, 10);
        assert_eq!(saved.page, 1);

        projection.reset();
        assert!(projection.saved_query().is_none());
        assert!(projection.snapshot().query.is_none());
    }
}
