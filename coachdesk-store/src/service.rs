//! Service objects handed to the presentation layer.
//!
//! [`EntityStore`] bundles the cache, mutation engine, search projection and
//! selectors of one entity family. [`CoachDesk`] holds one store per family
//! and runs the flows that touch more than one of them. Both are built from
//! explicit configuration and accessors; nothing here is global.

use std::sync::Arc;

use coachdesk_core::{
    Address, BranchId, CenterId, CoachingBranch, CoachingCenter, Comment, DeskResult, Outcome,
    Session, StoreConfig,
};
use tracing::{debug, info};

use crate::accessor::{EntityQuery, RemoteAccessor};
use crate::entity::StoreEntity;
use crate::keyed_cache::{CacheStats, KeyedCache};
use crate::mutation::MutationEngine;
use crate::preferences::{InMemoryPreferences, JsonFilePreferences, PreferenceStore};
use crate::projection::{EntityWindow, SearchProjection};
use crate::selectors::{Selection, Selectors};

/// Accessor behind a trait object, so stores can be built over any backend.
pub type DynAccessor<E> = Arc<dyn RemoteAccessor<E>>;

/// Everything the presentation layer needs for one entity family.
pub struct EntityStore<E: StoreEntity, A> {
    cache: KeyedCache<E, A>,
    engine: MutationEngine<E, A>,
    projection: SearchProjection<E, A>,
    selectors: Selectors<E>,
}

impl<E: StoreEntity, A: RemoteAccessor<E>> EntityStore<E, A> {
    /// # Errors
    /// `DeskError::Config` when the configuration is invalid.
    pub fn new(accessor: A, config: StoreConfig) -> DeskResult<Self> {
        Self::with_preferences(accessor, config, None)
    }

    /// # Errors
    /// `DeskError::Config` when the configuration is invalid.
    pub fn with_preferences(
        accessor: A,
        config: StoreConfig,
        preferences: Option<Arc<dyn PreferenceStore>>,
    ) -> DeskResult<Self> {
        config.validate()?;
        let policy = config.mutation_policy;
        let per_page = config.default_per_page;
        let cache = KeyedCache::new(accessor, config);
        Ok(Self {
            engine: MutationEngine::new(cache.clone(), policy),
            projection: SearchProjection::new(cache.clone(), preferences),
            selectors: Selectors::new(per_page),
            cache,
        })
    }

    pub fn cache(&self) -> &KeyedCache<E, A> {
        &self.cache
    }

    pub fn projection(&self) -> &SearchProjection<E, A> {
        &self.projection
    }

    pub fn selectors(&self) -> &Selectors<E> {
        &self.selectors
    }

    pub async fn get(&self, session: &Session, id: &E::Id) -> DeskResult<Arc<E>> {
        self.cache.get(session, id).await
    }

    pub async fn reload(&self, session: &Session, id: &E::Id) -> DeskResult<Arc<E>> {
        self.cache.reload(session, id).await
    }

    pub async fn create(&self, session: &Session, draft: &E::Draft) -> DeskResult<Arc<E>> {
        self.engine.create(session, draft).await
    }

    pub async fn update(
        &self,
        session: &Session,
        id: &E::Id,
        patch: &E::Patch,
    ) -> DeskResult<Arc<E>> {
        self.engine.update(session, id, patch).await
    }

    pub async fn delete(&self, session: &Session, id: &E::Id) -> DeskResult<()> {
        self.engine.delete(session, id).await
    }

    pub fn mutation_in_flight(&self, id: &E::Id) -> bool {
        self.engine.in_flight(id)
    }

    pub async fn search(
        &self,
        session: &Session,
        query: EntityQuery<E>,
    ) -> DeskResult<Arc<EntityWindow<E>>> {
        self.projection.search(session, query).await
    }

    pub async fn next_page(&self, session: &Session) -> DeskResult<Arc<EntityWindow<E>>> {
        self.projection.next_page(session).await
    }

    pub async fn refresh(&self, session: &Session) -> DeskResult<Arc<EntityWindow<E>>> {
        self.projection.refresh(session).await
    }

    pub fn reset_search(&self) {
        self.projection.reset();
    }

    /// Run the last persisted search, or the default one.
    pub async fn restore_search(&self, session: &Session) -> DeskResult<Arc<EntityWindow<E>>> {
        let query = self
            .projection
            .saved_query()
            .unwrap_or_else(|| self.projection.default_query());
        self.projection.search(session, query).await
    }

    pub async fn load_group(
        &self,
        session: &Session,
        key: &E::GroupKey,
    ) -> DeskResult<Arc<[Arc<E>]>> {
        self.cache.load_group(session, key).await
    }

    /// Drop every cached record and the active search.
    pub fn clear(&self) {
        self.cache.clear();
        self.projection.reset();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ------------------------------------------------------------------------
    // Selectors over the current snapshots
    // ------------------------------------------------------------------------

    pub fn entity_by_id(&self, id: &E::Id) -> Selection<Option<Arc<E>>> {
        self.selectors.entity_by_id(&self.cache.snapshot(), id)
    }

    pub fn items_for_key(&self, key: &E::GroupKey) -> Selection<Arc<[Arc<E>]>> {
        self.selectors.items_for_key(&self.cache.snapshot(), key)
    }

    pub fn search_result(&self) -> Selection<Arc<EntityWindow<E>>> {
        self.selectors
            .search_result(&self.cache.snapshot(), &self.projection.snapshot())
    }

    pub fn operation_in_progress(&self, id: &E::Id) -> Selection<bool> {
        self.selectors
            .operation_in_progress(&self.cache.snapshot(), id)
    }

    pub fn is_loading(&self, id: &E::Id) -> bool {
        self.selectors.is_loading(&self.cache.snapshot(), id)
    }
}

/// Turn a store result into the envelope views consume.
pub fn outcome<T: Clone>(result: DeskResult<Arc<T>>) -> Outcome<T> {
    Outcome::from(result.map(|value| T::clone(&value)))
}

// ============================================================================
// COACHDESK
// ============================================================================

/// One accessor per entity family.
pub struct Accessors {
    pub centers: DynAccessor<CoachingCenter>,
    pub branches: DynAccessor<CoachingBranch>,
    pub addresses: DynAccessor<Address>,
    pub comments: DynAccessor<Comment>,
}

/// The stores of every entity family, sharing one configuration and one
/// preference store.
pub struct CoachDesk {
    pub centers: EntityStore<CoachingCenter, DynAccessor<CoachingCenter>>,
    pub branches: EntityStore<CoachingBranch, DynAccessor<CoachingBranch>>,
    pub addresses: EntityStore<Address, DynAccessor<Address>>,
    pub comments: EntityStore<Comment, DynAccessor<Comment>>,
    preferences: Arc<dyn PreferenceStore>,
}

impl CoachDesk {
    /// Build the stores. Preferences go to `config.preferences_path` when it
    /// is set and stay in memory otherwise.
    ///
    /// # Errors
    /// `DeskError::Config` when the configuration is invalid.
    pub fn new(accessors: Accessors, config: StoreConfig) -> DeskResult<Self> {
        let preferences: Arc<dyn PreferenceStore> = match &config.preferences_path {
            Some(path) => Arc::new(JsonFilePreferences::new(path)),
            None => Arc::new(InMemoryPreferences::new()),
        };
        Self::with_preferences(accessors, config, preferences)
    }

    pub fn with_preferences(
        accessors: Accessors,
        config: StoreConfig,
        preferences: Arc<dyn PreferenceStore>,
    ) -> DeskResult<Self> {
        config.validate()?;
        info!(
            mutation_policy = ?config.mutation_policy,
            max_per_page = config.max_per_page,
            "building entity stores"
        );
        let prefs = Some(Arc::clone(&preferences));
        Ok(Self {
            centers: EntityStore::with_preferences(
                accessors.centers,
                config.clone(),
                prefs.clone(),
            )?,
            branches: EntityStore::with_preferences(
                accessors.branches,
                config.clone(),
                prefs.clone(),
            )?,
            addresses: EntityStore::with_preferences(
                accessors.addresses,
                config.clone(),
                prefs.clone(),
            )?,
            comments: EntityStore::with_preferences(accessors.comments, config, prefs)?,
            preferences,
        })
    }

    pub fn preferences(&self) -> &Arc<dyn PreferenceStore> {
        &self.preferences
    }

    /// Delete a center and drop its cached branch list.
    pub async fn delete_center(&self, session: &Session, id: &CenterId) -> DeskResult<()> {
        self.centers.delete(session, id).await?;
        self.branches.cache().invalidate_group(id);
        let orphans: Vec<BranchId> = self
            .branches
            .cache()
            .snapshot()
            .entries()
            .filter_map(|(_, entry)| entry.value.as_ref())
            .filter(|branch| &branch.center_id == id)
            .map(|branch| branch.id.clone())
            .collect();
        for branch in &orphans {
            self.branches.cache().remove(branch);
            self.drop_branch_addresses(branch);
        }
        debug!(center = %id, branches = orphans.len(), "dropped dependents of deleted center");
        Ok(())
    }

    /// Delete a branch, dropping it from its center's branch list and
    /// forgetting the branch's cached addresses.
    pub async fn delete_branch(&self, session: &Session, id: &BranchId) -> DeskResult<()> {
        self.branches.delete(session, id).await?;
        self.drop_branch_addresses(id);
        Ok(())
    }

    fn drop_branch_addresses(&self, branch: &BranchId) {
        let cache = self.addresses.cache();
        let stale: Vec<_> = cache
            .snapshot()
            .entries()
            .filter_map(|(_, entry)| entry.value.as_ref())
            .filter(|address| address.branch_id.as_ref() == Some(branch))
            .map(|address| address.id.clone())
            .collect();
        for id in &stale {
            cache.remove(id);
        }
    }

    /// Empty every store, e.g. on sign-out.
    pub fn clear_all(&self) {
        self.centers.clear();
        self.branches.clear();
        self.addresses.clear();
        self.comments.clear();
        info!("all entity stores cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use coachdesk_core::{
        AccessToken, CenterCategory, DeskError, NewAddress, NewBranch, NewCenter, UserId,
        UserRole,
    };

    fn owner() -> Session {
        Session::authenticated(UserId::from("owner-1"), UserRole::CenterOwner, AccessToken::new("t"))
    }

    fn desk() -> CoachDesk {
        CoachDesk::new(
            Accessors {
                centers: Arc::new(InMemoryBackend::<CoachingCenter>::new()),
                branches: Arc::new(InMemoryBackend::<CoachingBranch>::new()),
                addresses: Arc::new(InMemoryBackend::<Address>::new()),
                comments: Arc::new(InMemoryBackend::<Comment>::new()),
            },
            StoreConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_fails_at_construction() {
        let config = StoreConfig {
            max_per_page: 0,
            ..StoreConfig::default()
        };
        let result =
            EntityStore::<CoachingCenter, _>::new(Arc::new(InMemoryBackend::new()), config);
        assert!(matches!(result, Err(DeskError::Config(_))));

        let config = StoreConfig {
            default_per_page: 50,
            max_per_page: 10,
            ..StoreConfig::default()
        };
        let result = CoachDesk::new(
            Accessors {
                centers: Arc::new(InMemoryBackend::<CoachingCenter>::new()),
                branches: Arc::new(InMemoryBackend::<CoachingBranch>::new()),
                addresses: Arc::new(InMemoryBackend::<Address>::new()),
                comments: Arc::new(InMemoryBackend::<Comment>::new()),
            },
            config,
        );
        assert!(matches!(result, Err(DeskError::Config(_))));
    }

    #[tokio::test]
    async fn test_deleting_branch_drops_dependents() {
        let desk = desk();
        let session = owner();
        let center = desk
            .centers
            .create(&session, &NewCenter::new("Apex", CenterCategory::Sports))
            .await
            .unwrap();
        let branch = desk
            .branches
            .create(&session, &NewBranch::new(center.id.clone(), "North"))
            .await
            .unwrap();
        let mut draft = NewAddress::new("Delhi", "ND", "110001");
        draft.branch_id = Some(branch.id.clone());
        let address = desk.addresses.create(&session, &draft).await.unwrap();

        desk.branches.load_group(&session, &center.id).await.unwrap();
        assert_eq!(desk.branches.items_for_key(&center.id).data.len(), 1);

        desk.delete_branch(&session, &branch.id).await.unwrap();
        assert!(desk.branches.items_for_key(&center.id).data.is_empty());
        assert!(desk.addresses.cache().peek(&address.id).is_none());
    }

    #[tokio::test]
    async fn test_outcome_wraps_store_results() {
        let desk = desk();
        let result = desk
            .centers
            .create(&owner(), &NewCenter::new("", CenterCategory::Sports))
            .await;
        let envelope = outcome(result);
        assert!(!envelope.success);
        assert_eq!(envelope.errors[0].field, "name");

        let missing = desk.centers.get(&owner(), &CenterId::from("ghost")).await;
        assert!(matches!(missing, Err(DeskError::NotFound { .. })));
    }
}
