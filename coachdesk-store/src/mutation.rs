//! Optimistic mutation engine.
//!
//! An update is visible in the cache before the backend answers. On success
//! the cache holds the backend's full record and sibling rules are applied;
//! on failure the key is reloaded from the backend and the original error is
//! returned to the caller.
//!
//! Each id has at most one mutation in flight. Under
//! [`MutationPolicy::Queue`] a second mutation waits for the first to
//! settle; under [`MutationPolicy::Reject`] it fails immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coachdesk_core::{DeskError, DeskResult, MutationPolicy, Session, Validate};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::accessor::{require_id, RemoteAccessor};
use crate::entity::StoreEntity;
use crate::keyed_cache::KeyedCache;
use crate::state::{Action, Settlement};

/// Drives create, update and delete through the cache.
pub struct MutationEngine<E: StoreEntity, A> {
    cache: KeyedCache<E, A>,
    policy: MutationPolicy,
    locks: Mutex<HashMap<E::Id, Arc<tokio::sync::Mutex<()>>>>,
}

impl<E: StoreEntity, A: RemoteAccessor<E>> MutationEngine<E, A> {
    pub fn new(cache: KeyedCache<E, A>, policy: MutationPolicy) -> Self {
        Self {
            cache,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> MutationPolicy {
        self.policy
    }

    pub fn cache(&self) -> &KeyedCache<E, A> {
        &self.cache
    }

    /// Take the per-id mutation slot.
    async fn acquire(&self, id: &E::Id) -> DeskResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Slots nobody holds or waits for can go.
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        match self.policy {
            MutationPolicy::Queue => Ok(lock.lock_owned().await),
            MutationPolicy::Reject => lock.try_lock_owned().map_err(|_| {
                warn!(entity = %E::ENTITY_TYPE, %id, "mutation rejected, another is in flight");
                DeskError::MutationInFlight {
                    entity_type: E::ENTITY_TYPE,
                    id: id.to_string(),
                }
            }),
        }
    }

    /// Validate, call the backend, and cache the created record.
    pub async fn create(&self, session: &Session, draft: &E::Draft) -> DeskResult<Arc<E>> {
        draft.validate()?;
        let created = self.cache.accessor().create(session, draft).await?;
        let created = Arc::new(created);
        info!(entity = %E::ENTITY_TYPE, id = %created.id(), "created");

        // A new record may displace a sibling, e.g. a new primary address.
        let mut values = vec![Arc::clone(&created)];
        let snapshot = self.cache.snapshot();
        values.extend(
            snapshot
                .entries()
                .filter(|(_, entry)| !entry.is_mutating())
                .filter_map(|(_, entry)| entry.value.as_ref())
                .filter_map(|sibling| E::reconcile_sibling(&created, sibling))
                .map(Arc::new),
        );
        self.cache.upsert_shared(values);
        Ok(created)
    }

    /// Apply a patch optimistically, then confirm or revert.
    ///
    /// # Errors
    /// Validation errors are returned before anything changes. A backend
    /// failure is returned after the key has been reloaded.
    pub async fn update(
        &self,
        session: &Session,
        id: &E::Id,
        patch: &E::Patch,
    ) -> DeskResult<Arc<E>> {
        require_id(id)?;
        patch.validate()?;
        let _slot = self.acquire(id).await?;

        let before = self.cache.get(session, id).await?;
        let token = self.cache.next_token();
        let mut optimistic = E::clone(&before);
        optimistic.apply_patch(patch);
        self.cache.dispatch(Action::OptimisticApplied {
            id: id.clone(),
            token,
            value: Arc::new(optimistic),
        });
        info!(entity = %E::ENTITY_TYPE, %id, token, "optimistic update applied");

        match self.cache.accessor().update(session, id, patch).await {
            Ok(confirmed) => {
                let confirmed = Arc::new(confirmed);
                if self.cache.complete(Action::MutationConfirmed {
                    id: id.clone(),
                    token,
                    value: Arc::clone(&confirmed),
                }) {
                    info!(entity = %E::ENTITY_TYPE, %id, token, "update confirmed");
                } else {
                    warn!(entity = %E::ENTITY_TYPE, %id, token, "discarded stale confirmation");
                }
                Ok(confirmed)
            }
            Err(failure) => {
                warn!(entity = %E::ENTITY_TYPE, %id, token, error = %failure, "update failed, reverting");
                self.revert(session, id, token, before).await;
                Err(failure)
            }
        }
    }

    /// Reload a key after a failed write. The pre-mutation value is put back
    /// when the reload itself fails for a reason other than `NotFound`.
    async fn revert(&self, session: &Session, id: &E::Id, token: u64, before: Arc<E>) {
        if !self.cache.complete(Action::MutationReverting {
            id: id.clone(),
            token,
        }) {
            warn!(entity = %E::ENTITY_TYPE, %id, token, "key changed before revert");
            return;
        }

        let settlement = match self.cache.accessor().fetch_by_id(session, id).await {
            Ok(fresh) => Settlement::Reloaded(Arc::new(fresh)),
            Err(reload) if reload.is_not_found() => {
                warn!(entity = %E::ENTITY_TYPE, %id, "record vanished during revert");
                Settlement::Vanished(reload)
            }
            Err(reload) => {
                error!(
                    entity = %E::ENTITY_TYPE,
                    %id,
                    error = %reload,
                    "reload after failed update also failed, restoring previous value"
                );
                Settlement::Restored(before)
            }
        };
        if !self.cache.complete(Action::MutationSettled {
            id: id.clone(),
            token,
            settlement,
        }) {
            warn!(entity = %E::ENTITY_TYPE, %id, token, "discarded stale revert");
        }
    }

    /// Delete a record and drop it, with its parent group list, from the cache.
    pub async fn delete(&self, session: &Session, id: &E::Id) -> DeskResult<()> {
        require_id(id)?;
        let _slot = self.acquire(id).await?;

        let group = self.cache.peek(id).and_then(|value| value.group_key());
        self.cache.accessor().delete(session, id).await?;
        self.cache.purge(id, group);
        info!(entity = %E::ENTITY_TYPE, %id, "deleted");
        Ok(())
    }

    /// True while a mutation holds the slot for `id`.
    pub fn in_flight(&self, id: &E::Id) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(id)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }
}
