//! Keyed cache with single-flight fetches.
//!
//! State lives in a `tokio::sync::watch` channel holding immutable
//! [`CacheState`] snapshots; every write goes through the reducer. Concurrent
//! `get`s for a key that is not cached share one accessor call: the first
//! caller spawns the fetch as its own task and later callers await the same
//! shared result. Dropping a waiting caller never cancels the fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use coachdesk_core::{DeskError, DeskResult, Session, StoreConfig};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::accessor::{require_id, EntityQuery, RemoteAccessor};
use crate::entity::StoreEntity;
use crate::state::{reduce, Action, CacheState};

type SharedFetch<E> = Shared<BoxFuture<'static, DeskResult<Arc<E>>>>;

struct InFlight<E> {
    token: u64,
    fetch: SharedFetch<E>,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads that started an accessor call.
    pub misses: u64,
    /// Reads that joined a fetch already in flight.
    pub coalesced: u64,
    /// Responses discarded by the stale-write guard.
    pub stale_drops: u64,
    /// Number of keys currently in the cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale_drops: AtomicU64,
}

pub(crate) struct CacheInner<E: StoreEntity, A> {
    accessor: A,
    config: StoreConfig,
    state: watch::Sender<Arc<CacheState<E>>>,
    in_flight: Mutex<HashMap<E::Id, InFlight<E>>>,
    tokens: AtomicU64,
    stats: StatCounters,
}

impl<E: StoreEntity, A: RemoteAccessor<E>> CacheInner<E, A> {
    fn dispatch(&self, action: Action<E>) -> bool {
        self.state.send_if_modified(|current| match reduce(current, action) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        })
    }

    /// Dispatch a write that completes a request, counting it if it was stale.
    fn complete(&self, action: Action<E>) -> bool {
        let accepted = self.dispatch(action);
        if !accepted {
            self.stats.stale_drops.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    fn finish_flight(&self, id: &E::Id, token: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(id).map(|f| f.token) == Some(token) {
            in_flight.remove(id);
        }
    }
}

/// Cache of one entity family, keyed by id.
///
/// Cloning yields another handle to the same cache.
pub struct KeyedCache<E: StoreEntity, A> {
    inner: Arc<CacheInner<E, A>>,
}

impl<E: StoreEntity, A> Clone for KeyedCache<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: StoreEntity, A: RemoteAccessor<E>> KeyedCache<E, A> {
    pub fn new(accessor: A, config: StoreConfig) -> Self {
        let (state, _) = watch::channel(Arc::new(CacheState::default()));
        Self {
            inner: Arc::new(CacheInner {
                accessor,
                config,
                state,
                in_flight: Mutex::new(HashMap::new()),
                tokens: AtomicU64::new(0),
                stats: StatCounters::default(),
            }),
        }
    }

    pub fn accessor(&self) -> &A {
        &self.inner.accessor
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Issue a fresh request token. Tokens only ever increase.
    pub fn next_token(&self) -> u64 {
        self.inner.tokens.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply an action to the state. Returns false when the reducer rejected
    /// it or it changed nothing.
    pub fn dispatch(&self, action: Action<E>) -> bool {
        self.inner.dispatch(action)
    }

    pub(crate) fn complete(&self, action: Action<E>) -> bool {
        self.inner.complete(action)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<CacheState<E>> {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified with every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheState<E>>> {
        self.inner.state.subscribe()
    }

    /// The cached value without touching the backend.
    pub fn peek(&self, id: &E::Id) -> Option<Arc<E>> {
        self.inner.state.borrow().value(id).cloned()
    }

    /// Return the cached value, fetching it once if absent.
    ///
    /// # Errors
    /// Returns the accessor's error. The key is left `Failed` and the next
    /// `get` fetches again.
    pub async fn get(&self, session: &Session, id: &E::Id) -> DeskResult<Arc<E>> {
        require_id(id)?;
        if let Some(value) = self.peek(id) {
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(entity = %E::ENTITY_TYPE, %id, "cache hit");
            return Ok(value);
        }
        match self.start_fetch(session, id, false) {
            Ok(value) => Ok(value),
            Err(fetch) => fetch.await,
        }
    }

    /// Fetch the key from the backend even if it is cached, joining a fetch
    /// already in flight.
    pub async fn reload(&self, session: &Session, id: &E::Id) -> DeskResult<Arc<E>> {
        require_id(id)?;
        match self.start_fetch(session, id, true) {
            Ok(value) => Ok(value),
            Err(fetch) => fetch.await,
        }
    }

    /// Either a value that landed while we waited for the lock, or the
    /// shared fetch to await.
    fn start_fetch(
        &self,
        session: &Session,
        id: &E::Id,
        force: bool,
    ) -> Result<Arc<E>, SharedFetch<E>> {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(flight) = in_flight.get(id) {
            self.inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(entity = %E::ENTITY_TYPE, %id, "joining fetch in flight");
            return Err(flight.fetch.clone());
        }
        if !force {
            if let Some(value) = self.peek(id) {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
        }

        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        let token = self.next_token();
        self.dispatch(Action::FetchStarted {
            id: id.clone(),
            token,
        });
        debug!(entity = %E::ENTITY_TYPE, %id, token, "fetch started");

        let inner = Arc::clone(&self.inner);
        let session = session.clone();
        let key = id.clone();
        let task = tokio::spawn(async move {
            let result = inner.accessor.fetch_by_id(&session, &key).await.map(Arc::new);
            let action = match &result {
                Ok(value) => Action::FetchSucceeded {
                    id: key.clone(),
                    token,
                    value: Arc::clone(value),
                },
                Err(error) => Action::FetchFailed {
                    id: key.clone(),
                    token,
                    error: error.clone(),
                },
            };
            if !inner.complete(action) {
                warn!(entity = %E::ENTITY_TYPE, id = %key, token, "discarded stale fetch result");
            }
            inner.finish_flight(&key, token);
            result
        });

        let fetch: SharedFetch<E> = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(DeskError::unknown(format!(
                    "fetch task failed: {}",
                    join_error
                ))),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            id.clone(),
            InFlight {
                token,
                fetch: fetch.clone(),
            },
        );
        Err(fetch)
    }

    /// Write values into the cache, returning them as shared handles.
    pub fn upsert(&self, values: impl IntoIterator<Item = E>) -> Vec<Arc<E>> {
        let values: Vec<Arc<E>> = values.into_iter().map(Arc::new).collect();
        self.upsert_shared(values.clone());
        values
    }

    pub(crate) fn upsert_shared(&self, values: Vec<Arc<E>>) -> bool {
        if values.is_empty() {
            return false;
        }
        let token = self.next_token();
        self.dispatch(Action::Upsert { values, token })
    }

    /// Drop a key. A fetch in flight for it still completes for its waiters,
    /// but its result is not written back.
    pub fn remove(&self, id: &E::Id) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if self.dispatch(Action::Remove { id: id.clone() }) {
            debug!(entity = %E::ENTITY_TYPE, %id, "removed");
        }
    }

    /// Drop a deleted record and the list of its parent group.
    pub fn purge(&self, id: &E::Id, group: Option<E::GroupKey>) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.dispatch(Action::Purge {
            id: id.clone(),
            group,
        });
    }

    pub fn invalidate_group(&self, key: &E::GroupKey) {
        self.dispatch(Action::InvalidateGroup { key: key.clone() });
    }

    /// Empty the cache. Clearing an empty cache changes nothing.
    pub fn clear(&self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if self.dispatch(Action::Clear) {
            debug!(entity = %E::ENTITY_TYPE, "cache cleared");
        }
    }

    /// Load every member of a group, up to the configured cap, and store
    /// the list.
    pub async fn load_group(
        &self,
        session: &Session,
        key: &E::GroupKey,
    ) -> DeskResult<Arc<[Arc<E>]>> {
        require_id(key)?;
        let token = self.next_token();
        self.dispatch(Action::GroupLoadStarted {
            key: key.clone(),
            token,
        });

        let cap = self.inner.config.group_fetch_cap;
        let per_page = self.inner.config.max_per_page;
        let mut items: Vec<Arc<E>> = Vec::new();
        let mut total = 0u64;
        let mut page = 1u32;
        loop {
            let query = EntityQuery::<E>::new(E::group_filters(key))
                .with_page(page)
                .with_per_page(per_page);
            match self.inner.accessor.search(session, &query).await {
                Ok(result) => {
                    total = result.total_count;
                    let received = result.items.len();
                    items.extend(result.items.into_iter().map(Arc::new));
                    if received == 0 || items.len() as u64 >= total || items.len() >= cap {
                        break;
                    }
                    page += 1;
                }
                Err(error) => {
                    warn!(entity = %E::ENTITY_TYPE, group = %key, %error, "group load failed");
                    self.complete(Action::GroupLoadFailed {
                        key: key.clone(),
                        token,
                        error: error.clone(),
                    });
                    return Err(error);
                }
            }
        }

        if items.len() > cap || (items.len() as u64) < total {
            warn!(
                entity = %E::ENTITY_TYPE,
                group = %key,
                total,
                cap,
                "group truncated at fetch cap"
            );
        }
        items.truncate(cap);
        let members: Arc<[Arc<E>]> = Arc::from(items.clone());
        if !self.complete(Action::GroupLoaded {
            key: key.clone(),
            token,
            items,
        }) {
            warn!(entity = %E::ENTITY_TYPE, group = %key, "discarded stale group load");
        }
        Ok(members)
    }

    pub fn stats(&self) -> CacheStats {
        let stats = &self.inner.stats;
        CacheStats {
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            coalesced: stats.coalesced.load(Ordering::Relaxed),
            stale_drops: stats.stale_drops.load(Ordering::Relaxed),
            entry_count: self.snapshot().len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, Operation};
    use chrono::Utc;
    use coachdesk_core::{CenterCategory, CenterId, CenterStatus, CoachingCenter, UserId};

    fn center(id: &str) -> CoachingCenter {
        let now = Utc::now();
        CoachingCenter {
            id: CenterId::from(id),
            owner_id: UserId::from("owner-1"),
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

    fn cache(
        records: Vec<CoachingCenter>,
    ) -> (
        KeyedCache<CoachingCenter, Arc<InMemoryBackend<CoachingCenter>>>,
        Arc<InMemoryBackend<CoachingCenter>>,
    ) {
        let backend = Arc::new(InMemoryBackend::with_records(records));
        (KeyedCache::new(backend.clone(), StoreConfig::default()), backend)
    }

    #[tokio::test]
    async fn test_get_fetches_once_then_hits() {
        let (cache, backend) = cache(vec![center("c-1")]);
        let session = Session::anonymous();
        let id = CenterId::from("c-1");

        let first = cache.get(&session, &id).await.unwrap();
        let second = cache.get(&session, &id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.calls(Operation::Fetch), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached_negatively() {
        let (cache, backend) = cache(vec![]);
        let session = Session::anonymous();
        let id = CenterId::from("missing");

        assert!(cache.get(&session, &id).await.unwrap_err().is_not_found());
        let entry = cache.snapshot().entry(&id).cloned().unwrap();
        assert!(entry.value.is_none());
        assert!(entry.status.error().is_some());

        backend.seed(vec![center("missing")]);
        assert!(cache.get(&session, &id).await.is_ok());
        assert_eq!(backend.calls(Operation::Fetch), 2);
    }

    #[tokio::test]
    async fn test_blank_id_is_rejected_before_any_call() {
        let (cache, backend) = cache(vec![]);
        let err = cache
            .get(&Session::anonymous(), &CenterId::from(""))
            .await
            .unwrap_err();
        assert_eq!(err.field_errors()[0].field, "id");
        assert_eq!(backend.calls(Operation::Fetch), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_snapshots() {
        let (cache, _backend) = cache(vec![]);
        let mut rx = cache.subscribe();
        cache.upsert(vec![center("c-1")]);
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert!(snapshot.value(&CenterId::from("c-1")).is_some());
    }

    #[tokio::test]
    async fn test_clear_twice_notifies_once() {
        let (cache, _backend) = cache(vec![]);
        cache.upsert(vec![center("c-1")]);
        let mut rx = cache.subscribe();
        cache.clear();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        cache.clear();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
