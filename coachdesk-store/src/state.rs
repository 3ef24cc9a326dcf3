//! Immutable cache snapshots and the reducer that produces them.
//!
//! Every change to a store goes through [`reduce`], a pure function from the
//! current snapshot and an [`Action`] to the next snapshot. Maps are shared
//! between snapshots behind `Arc` and copied on write, so a reader holding an
//! old snapshot never observes later changes.
//!
//! Writes that complete a request (fetch results, mutation confirmations,
//! reloads, group loads) carry the token the request was issued with. The
//! reducer drops them when the entry's token moved on in the meantime, or
//! when the entry is gone, which is how a removed or cleared key is kept from
//! being resurrected by a late response.

use std::collections::HashMap;
use std::sync::Arc;

use coachdesk_core::DeskError;

use crate::entity::StoreEntity;

/// Read status of a cached key.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EntryStatus {
    #[default]
    Idle,
    Loading,
    Failed(DeskError),
}

impl EntryStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn error(&self) -> Option<&DeskError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Where a key is in the optimistic mutation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MutationPhase {
    #[default]
    Idle,
    /// The patched value is visible and the backend call is in flight.
    OptimisticApplied,
    /// The backend refused the write and a reload is in flight.
    Reverting,
}

/// One cached key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<E> {
    pub value: Option<Arc<E>>,
    pub status: EntryStatus,
    pub mutation: MutationPhase,
    /// Token of the last accepted write.
    pub token: u64,
}

impl<E> CacheEntry<E> {
    fn loading(token: u64) -> Self {
        Self {
            value: None,
            status: EntryStatus::Loading,
            mutation: MutationPhase::Idle,
            token,
        }
    }

    fn ready(value: Arc<E>, token: u64) -> Self {
        Self {
            value: Some(value),
            status: EntryStatus::Idle,
            mutation: MutationPhase::Idle,
            token,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.mutation != MutationPhase::Idle
    }
}

/// Cached member list of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntry<E> {
    pub items: Arc<[Arc<E>]>,
    pub status: EntryStatus,
    /// False until a load for this group has completed.
    pub loaded: bool,
    pub token: u64,
}

/// How a reverted mutation settles.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement<E> {
    /// The reload returned the authoritative value.
    Reloaded(Arc<E>),
    /// The record no longer exists.
    Vanished(DeskError),
    /// The reload failed; the pre-mutation value is put back.
    Restored(Arc<E>),
}

/// Every change a store can make to its state.
#[derive(Debug, Clone)]
pub enum Action<E: StoreEntity> {
    FetchStarted {
        id: E::Id,
        token: u64,
    },
    FetchSucceeded {
        id: E::Id,
        token: u64,
        value: Arc<E>,
    },
    FetchFailed {
        id: E::Id,
        token: u64,
        error: DeskError,
    },
    /// Write values that came from a search, a create or a group load.
    /// Keys with a mutation in flight keep their optimistic value.
    Upsert {
        values: Vec<Arc<E>>,
        token: u64,
    },
    OptimisticApplied {
        id: E::Id,
        token: u64,
        value: Arc<E>,
    },
    MutationConfirmed {
        id: E::Id,
        token: u64,
        value: Arc<E>,
    },
    MutationReverting {
        id: E::Id,
        token: u64,
    },
    MutationSettled {
        id: E::Id,
        token: u64,
        settlement: Settlement<E>,
    },
    Remove {
        id: E::Id,
    },
    /// Remove a deleted record and drop its parent group list.
    Purge {
        id: E::Id,
        group: Option<E::GroupKey>,
    },
    InvalidateGroup {
        key: E::GroupKey,
    },
    Clear,
    GroupLoadStarted {
        key: E::GroupKey,
        token: u64,
    },
    GroupLoaded {
        key: E::GroupKey,
        token: u64,
        items: Vec<Arc<E>>,
    },
    GroupLoadFailed {
        key: E::GroupKey,
        token: u64,
        error: DeskError,
    },
}

/// Snapshot of one store.
#[derive(Debug)]
pub struct CacheState<E: StoreEntity> {
    entries: Arc<HashMap<E::Id, CacheEntry<E>>>,
    groups: Arc<HashMap<E::GroupKey, GroupEntry<E>>>,
    version: u64,
}

impl<E: StoreEntity> Clone for CacheState<E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            groups: Arc::clone(&self.groups),
            version: self.version,
        }
    }
}

impl<E: StoreEntity> Default for CacheState<E> {
    fn default() -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
            groups: Arc::new(HashMap::new()),
            version: 0,
        }
    }
}

impl<E: StoreEntity> CacheState<E> {
    pub fn entry(&self, id: &E::Id) -> Option<&CacheEntry<E>> {
        self.entries.get(id)
    }

    /// The cached value, if any.
    pub fn value(&self, id: &E::Id) -> Option<&Arc<E>> {
        self.entries.get(id).and_then(|e| e.value.as_ref())
    }

    pub fn group(&self, key: &E::GroupKey) -> Option<&GroupEntry<E>> {
        self.groups.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&E::Id, &CacheEntry<E>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.groups.is_empty()
    }

    /// Incremented by every accepted action.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Apply an action, returning the next snapshot or `None` when the action
/// is rejected or changes nothing.
pub fn reduce<E: StoreEntity>(state: &CacheState<E>, action: Action<E>) -> Option<CacheState<E>> {
    let mut next = state.clone();
    let changed = match action {
        Action::FetchStarted { id, token } => {
            let entries = Arc::make_mut(&mut next.entries);
            match entries.get_mut(&id) {
                Some(entry) if entry.is_mutating() => false,
                Some(entry) => {
                    entry.status = EntryStatus::Loading;
                    entry.token = token;
                    true
                }
                None => {
                    entries.insert(id, CacheEntry::loading(token));
                    true
                }
            }
        }

        Action::FetchSucceeded { id, token, value } => {
            if !accepts(&next, &id, token) {
                return None;
            }
            let entries = Arc::make_mut(&mut next.entries);
            entries.insert(id, CacheEntry::ready(value.clone(), token));
            replace_in_groups(&mut next.groups, std::slice::from_ref(&value));
            true
        }

        Action::FetchFailed { id, token, error } => {
            if !accepts(&next, &id, token) {
                return None;
            }
            let entries = Arc::make_mut(&mut next.entries);
            if let Some(entry) = entries.get_mut(&id) {
                entry.value = None;
                entry.status = EntryStatus::Failed(error);
            }
            true
        }

        Action::Upsert { values, token } => upsert(&mut next, values, token),

        Action::OptimisticApplied { id, token, value } => {
            let entries = Arc::make_mut(&mut next.entries);
            entries.insert(
                id,
                CacheEntry {
                    value: Some(value.clone()),
                    status: EntryStatus::Idle,
                    mutation: MutationPhase::OptimisticApplied,
                    token,
                },
            );
            replace_in_groups(&mut next.groups, std::slice::from_ref(&value));
            true
        }

        Action::MutationConfirmed { id, token, value } => {
            if !accepts(&next, &id, token) {
                return None;
            }
            let entries = Arc::make_mut(&mut next.entries);
            entries.insert(id, CacheEntry::ready(value.clone(), token));
            let mut changed = vec![value.clone()];
            changed.extend(reconcile_siblings(&mut next, &value));
            replace_in_groups(&mut next.groups, &changed);
            true
        }

        Action::MutationReverting { id, token } => {
            if !accepts(&next, &id, token) {
                return None;
            }
            let entries = Arc::make_mut(&mut next.entries);
            if let Some(entry) = entries.get_mut(&id) {
                entry.mutation = MutationPhase::Reverting;
            }
            true
        }

        Action::MutationSettled {
            id,
            token,
            settlement,
        } => {
            if !accepts(&next, &id, token) {
                return None;
            }
            match settlement {
                Settlement::Reloaded(value) | Settlement::Restored(value) => {
                    let entries = Arc::make_mut(&mut next.entries);
                    entries.insert(id, CacheEntry::ready(value.clone(), token));
                    replace_in_groups(&mut next.groups, std::slice::from_ref(&value));
                }
                Settlement::Vanished(error) => {
                    let entries = Arc::make_mut(&mut next.entries);
                    entries.insert(
                        id.clone(),
                        CacheEntry {
                            value: None,
                            status: EntryStatus::Failed(error),
                            mutation: MutationPhase::Idle,
                            token,
                        },
                    );
                    remove_from_groups(&mut next.groups, &id);
                }
            }
            true
        }

        Action::Remove { id } => {
            let had_entry = next.entries.contains_key(&id);
            if had_entry {
                Arc::make_mut(&mut next.entries).remove(&id);
            }
            let in_group = remove_from_groups(&mut next.groups, &id);
            had_entry || in_group
        }

        Action::Purge { id, group } => {
            let had_entry = next.entries.contains_key(&id);
            if had_entry {
                Arc::make_mut(&mut next.entries).remove(&id);
            }
            let in_group = remove_from_groups(&mut next.groups, &id);
            let dropped_group = match group {
                Some(key) if next.groups.contains_key(&key) => {
                    Arc::make_mut(&mut next.groups).remove(&key);
                    true
                }
                _ => false,
            };
            had_entry || in_group || dropped_group
        }

        Action::InvalidateGroup { key } => {
            if !next.groups.contains_key(&key) {
                return None;
            }
            Arc::make_mut(&mut next.groups).remove(&key);
            true
        }

        Action::Clear => {
            if next.entries.is_empty() && next.groups.is_empty() {
                return None;
            }
            next.entries = Arc::new(HashMap::new());
            next.groups = Arc::new(HashMap::new());
            true
        }

        Action::GroupLoadStarted { key, token } => {
            let groups = Arc::make_mut(&mut next.groups);
            let entry = groups.entry(key).or_insert_with(|| GroupEntry {
                items: Arc::from(Vec::new()),
                status: EntryStatus::Idle,
                loaded: false,
                token,
            });
            entry.status = EntryStatus::Loading;
            entry.token = token;
            true
        }

        Action::GroupLoaded { key, token, items } => {
            if next.groups.get(&key).map(|g| g.token) != Some(token) {
                return None;
            }
            upsert(&mut next, items.clone(), token);
            // Members with a mutation in flight are listed with their cached value.
            let members: Vec<Arc<E>> = items
                .into_iter()
                .map(|item| match next.entries.get(item.id()) {
                    Some(entry) if entry.is_mutating() => entry.value.clone().unwrap_or(item),
                    _ => item,
                })
                .collect();
            let groups = Arc::make_mut(&mut next.groups);
            groups.insert(
                key,
                GroupEntry {
                    items: Arc::from(members),
                    status: EntryStatus::Idle,
                    loaded: true,
                    token,
                },
            );
            true
        }

        Action::GroupLoadFailed { key, token, error } => {
            if next.groups.get(&key).map(|g| g.token) != Some(token) {
                return None;
            }
            let groups = Arc::make_mut(&mut next.groups);
            if let Some(group) = groups.get_mut(&key) {
                group.status = EntryStatus::Failed(error);
            }
            true
        }
    };

    if !changed {
        return None;
    }
    next.version = state.version + 1;
    Some(next)
}

fn accepts<E: StoreEntity>(state: &CacheState<E>, id: &E::Id, token: u64) -> bool {
    state.entries.get(id).map(|e| e.token) == Some(token)
}

fn upsert<E: StoreEntity>(state: &mut CacheState<E>, values: Vec<Arc<E>>, token: u64) -> bool {
    let mut written = Vec::with_capacity(values.len());
    {
        let entries = Arc::make_mut(&mut state.entries);
        for value in values {
            match entries.get(value.id()) {
                Some(entry) if entry.is_mutating() => continue,
                Some(entry) if entry.value.as_deref() == Some(value.as_ref()) => continue,
                _ => {}
            }
            entries.insert(value.id().clone(), CacheEntry::ready(value.clone(), token));
            written.push(value);
        }
    }
    if written.is_empty() {
        return false;
    }
    replace_in_groups(&mut state.groups, &written);
    append_to_groups(&mut state.groups, &written);
    true
}

/// Apply sibling rules for a confirmed value, returning the adjusted siblings.
fn reconcile_siblings<E: StoreEntity>(state: &mut CacheState<E>, confirmed: &E) -> Vec<Arc<E>> {
    let adjusted: Vec<Arc<E>> = state
        .entries
        .values()
        .filter(|entry| !entry.is_mutating())
        .filter_map(|entry| entry.value.as_ref())
        .filter_map(|sibling| E::reconcile_sibling(confirmed, sibling))
        .map(Arc::new)
        .collect();
    if !adjusted.is_empty() {
        let entries = Arc::make_mut(&mut state.entries);
        for value in &adjusted {
            if let Some(entry) = entries.get_mut(value.id()) {
                entry.value = Some(value.clone());
            }
        }
    }
    adjusted
}

/// Swap in new values for members already listed in any group.
fn replace_in_groups<E: StoreEntity>(
    groups: &mut Arc<HashMap<E::GroupKey, GroupEntry<E>>>,
    values: &[Arc<E>],
) {
    let by_id: HashMap<&E::Id, &Arc<E>> = values.iter().map(|v| (v.id(), v)).collect();
    let touched: Vec<E::GroupKey> = groups
        .iter()
        .filter(|(_, g)| g.items.iter().any(|item| by_id.contains_key(item.id())))
        .map(|(k, _)| k.clone())
        .collect();
    if touched.is_empty() {
        return;
    }
    let groups = Arc::make_mut(groups);
    for key in touched {
        if let Some(group) = groups.get_mut(&key) {
            let items: Vec<Arc<E>> = group
                .items
                .iter()
                .map(|item| match by_id.get(item.id()) {
                    Some(value) => Arc::clone(value),
                    None => item.clone(),
                })
                .collect();
            group.items = Arc::from(items);
        }
    }
}

/// List new members of loaded groups.
fn append_to_groups<E: StoreEntity>(
    groups: &mut Arc<HashMap<E::GroupKey, GroupEntry<E>>>,
    values: &[Arc<E>],
) {
    let additions: Vec<(E::GroupKey, Arc<E>)> = values
        .iter()
        .filter_map(|v| v.group_key().map(|k| (k, v.clone())))
        .filter(|(k, v)| {
            groups
                .get(k)
                .map(|g| g.loaded && !g.items.iter().any(|item| item.id() == v.id()))
                .unwrap_or(false)
        })
        .collect();
    if additions.is_empty() {
        return;
    }
    let groups = Arc::make_mut(groups);
    for (key, value) in additions {
        if let Some(group) = groups.get_mut(&key) {
            let mut items = group.items.to_vec();
            items.push(value);
            group.items = Arc::from(items);
        }
    }
}

fn remove_from_groups<E: StoreEntity>(
    groups: &mut Arc<HashMap<E::GroupKey, GroupEntry<E>>>,
    id: &E::Id,
) -> bool {
    let touched: Vec<E::GroupKey> = groups
        .iter()
        .filter(|(_, g)| g.items.iter().any(|item| item.id() == id))
        .map(|(k, _)| k.clone())
        .collect();
    if touched.is_empty() {
        return false;
    }
    let groups = Arc::make_mut(groups);
    for key in touched {
        if let Some(group) = groups.get_mut(&key) {
            let items: Vec<Arc<E>> = group
                .items
                .iter()
                .filter(|item| item.id() != id)
                .cloned()
                .collect();
            group.items = Arc::from(items);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coachdesk_core::{Address, AddressId, AddressType, EntityType, UserId};

    fn address(id: &str, primary: bool) -> Arc<Address> {
        let now = Utc::now();
        Arc::new(Address {
            id: AddressId::from(id),
            user_id: Some(UserId::from("u-1")),
            branch_id: None,
            address_type: AddressType::Home,
            label: None,
            address_line_1: None,
            address_line_2: None,
            city: None,
            district: "ND".to_string(),
            state: "Delhi".to_string(),
            country: "India".to_string(),
            pin_code: "110001".to_string(),
            latitude: None,
            longitude: None,
            is_primary: primary,
            created_at: now,
            updated_at: now,
        })
    }

    fn apply(state: CacheState<Address>, action: Action<Address>) -> CacheState<Address> {
        reduce(&state, action).unwrap_or(state)
    }

    fn id(raw: &str) -> AddressId {
        AddressId::from(raw)
    }

    #[test]
    fn test_fetch_cycle() {
        let state = CacheState::<Address>::default();
        let state = apply(state, Action::FetchStarted { id: id("a"), token: 1 });
        assert!(state.entry(&id("a")).unwrap().status.is_loading());

        let state = apply(
            state,
            Action::FetchSucceeded {
                id: id("a"),
                token: 1,
                value: address("a", false),
            },
        );
        let entry = state.entry(&id("a")).unwrap();
        assert_eq!(entry.status, EntryStatus::Idle);
        assert!(entry.value.is_some());
    }

    #[test]
    fn test_failed_entry_holds_no_value() {
        let state = apply(
            CacheState::default(),
            Action::Upsert {
                values: vec![address("a", false)],
                token: 1,
            },
        );
        let state = apply(state, Action::FetchStarted { id: id("a"), token: 2 });
        let state = apply(
            state,
            Action::FetchFailed {
                id: id("a"),
                token: 2,
                error: DeskError::not_found(EntityType::Address, "a"),
            },
        );
        let entry = state.entry(&id("a")).unwrap();
        assert!(entry.value.is_none());
        assert!(entry.status.error().unwrap().is_not_found());
    }

    #[test]
    fn test_late_fetch_after_remove_is_dropped() {
        let state = apply(CacheState::default(), Action::FetchStarted { id: id("a"), token: 1 });
        let state = apply(state, Action::Remove { id: id("a") });
        let result = reduce(
            &state,
            Action::FetchSucceeded {
                id: id("a"),
                token: 1,
                value: address("a", false),
            },
        );
        assert!(result.is_none());
        assert!(state.entry(&id("a")).is_none());
    }

    #[test]
    fn test_stale_token_is_dropped() {
        let state = apply(CacheState::default(), Action::FetchStarted { id: id("a"), token: 1 });
        let state = apply(
            state,
            Action::Upsert {
                values: vec![address("a", true)],
                token: 2,
            },
        );
        let stale = reduce(
            &state,
            Action::FetchSucceeded {
                id: id("a"),
                token: 1,
                value: address("a", false),
            },
        );
        assert!(stale.is_none());
        assert!(state.value(&id("a")).unwrap().is_primary);
    }

    #[test]
    fn test_upsert_skips_keys_with_mutation_in_flight() {
        let state = apply(
            CacheState::default(),
            Action::OptimisticApplied {
                id: id("a"),
                token: 1,
                value: address("a", true),
            },
        );
        let result = reduce(
            &state,
            Action::Upsert {
                values: vec![address("a", false)],
                token: 2,
            },
        );
        assert!(result.is_none());
        assert!(state.value(&id("a")).unwrap().is_primary);
    }

    #[test]
    fn test_confirm_reconciles_siblings() {
        let state = apply(
            CacheState::default(),
            Action::Upsert {
                values: vec![address("addr-2", true)],
                token: 1,
            },
        );
        let state = apply(
            state,
            Action::OptimisticApplied {
                id: id("addr-1"),
                token: 2,
                value: address("addr-1", true),
            },
        );
        let state = apply(
            state,
            Action::MutationConfirmed {
                id: id("addr-1"),
                token: 2,
                value: address("addr-1", true),
            },
        );
        assert!(state.value(&id("addr-1")).unwrap().is_primary);
        assert!(!state.value(&id("addr-2")).unwrap().is_primary);
        assert_eq!(state.entry(&id("addr-1")).unwrap().mutation, MutationPhase::Idle);
    }

    #[test]
    fn test_vanished_settlement_marks_not_found() {
        let state = apply(
            CacheState::default(),
            Action::OptimisticApplied {
                id: id("a"),
                token: 1,
                value: address("a", true),
            },
        );
        let state = apply(state, Action::MutationReverting { id: id("a"), token: 1 });
        let state = apply(
            state,
            Action::MutationSettled {
                id: id("a"),
                token: 1,
                settlement: Settlement::Vanished(DeskError::not_found(EntityType::Address, "a")),
            },
        );
        let entry = state.entry(&id("a")).unwrap();
        assert!(entry.value.is_none());
        assert!(entry.status.error().unwrap().is_not_found());
        assert_eq!(entry.mutation, MutationPhase::Idle);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let state = apply(
            CacheState::default(),
            Action::Upsert {
                values: vec![address("a", false)],
                token: 1,
            },
        );
        let cleared = reduce(&state, Action::Clear).unwrap();
        assert!(cleared.is_empty());
        assert!(reduce(&cleared, Action::Clear).is_none());
    }

    #[test]
    fn test_old_snapshot_is_unaffected_by_later_actions() {
        let before = apply(
            CacheState::default(),
            Action::Upsert {
                values: vec![address("a", false)],
                token: 1,
            },
        );
        let after = reduce(&before, Action::Remove { id: id("a") }).unwrap();
        assert!(before.value(&id("a")).is_some());
        assert!(after.value(&id("a")).is_none());
        assert_eq!(after.version(), before.version() + 1);
    }

    #[test]
    fn test_group_load_and_purge() {
        let owner = UserId::from("u-1");
        let state = apply(
            CacheState::default(),
            Action::GroupLoadStarted {
                key: owner.clone(),
                token: 1,
            },
        );
        let state = apply(
            state,
            Action::GroupLoaded {
                key: owner.clone(),
                token: 1,
                items: vec![address("a", false), address("b", false)],
            },
        );
        assert_eq!(state.group(&owner).unwrap().items.len(), 2);
        assert!(state.value(&id("a")).is_some());

        // A created member is appended to the loaded list.
        let state = apply(
            state,
            Action::Upsert {
                values: vec![address("c", false)],
                token: 2,
            },
        );
        assert_eq!(state.group(&owner).unwrap().items.len(), 3);

        let state = apply(
            state,
            Action::Purge {
                id: id("a"),
                group: Some(owner.clone()),
            },
        );
        assert!(state.group(&owner).is_none());
        assert!(state.value(&id("a")).is_none());
    }

    #[test]
    fn test_stale_group_load_is_dropped() {
        let owner = UserId::from("u-1");
        let state = apply(
            CacheState::default(),
            Action::GroupLoadStarted {
                key: owner.clone(),
                token: 1,
            },
        );
        let state = apply(
            state,
            Action::GroupLoadStarted {
                key: owner.clone(),
                token: 2,
            },
        );
        assert!(reduce(
            &state,
            Action::GroupLoaded {
                key: owner,
                token: 1,
                items: vec![address("a", false)],
            },
        )
        .is_none());
    }
}
