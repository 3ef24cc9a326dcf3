//! Read-only views over store snapshots.
//!
//! A selector for a key with nothing cached returns one of the shared empty
//! values held by [`Selectors`], never a fresh allocation, so consumers that
//! detect changes with `Arc::ptr_eq` only see a new reference when the
//! underlying state actually moved.

use std::sync::{Arc, Mutex};

use coachdesk_core::{DeskError, SearchWindow};

use crate::entity::StoreEntity;
use crate::projection::{EntityWindow, ProjectionState};
use crate::state::CacheState;

/// What a view needs to render: the data, whether a load is running and the
/// last error.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<T> {
    pub data: T,
    pub is_loading: bool,
    pub error: Option<DeskError>,
}

impl<T> Selection<T> {
    fn ready(data: T) -> Self {
        Self {
            data,
            is_loading: false,
            error: None,
        }
    }
}

struct ResolvedWindow<E> {
    cache_version: u64,
    source: Arc<EntityWindow<E>>,
    resolved: Arc<EntityWindow<E>>,
}

/// Selectors of one entity family with their shared empty defaults.
pub struct Selectors<E: StoreEntity> {
    empty_items: Arc<[Arc<E>]>,
    empty_window: Arc<EntityWindow<E>>,
    last_window: Mutex<Option<ResolvedWindow<E>>>,
}

impl<E: StoreEntity> Selectors<E> {
    pub fn new(per_page: u32) -> Self {
        Self {
            empty_items: Arc::from(Vec::new()),
            empty_window: Arc::new(SearchWindow::empty(1, per_page)),
            last_window: Mutex::new(None),
        }
    }

    pub fn empty_items(&self) -> &Arc<[Arc<E>]> {
        &self.empty_items
    }

    pub fn empty_window(&self) -> &Arc<EntityWindow<E>> {
        &self.empty_window
    }

    pub fn entity_by_id(&self, state: &CacheState<E>, id: &E::Id) -> Selection<Option<Arc<E>>> {
        match state.entry(id) {
            Some(entry) => Selection {
                data: entry.value.clone(),
                is_loading: entry.status.is_loading(),
                error: entry.status.error().cloned(),
            },
            None => Selection::ready(None),
        }
    }

    /// Members of a group, or the shared empty list when the group was never
    /// loaded.
    pub fn items_for_key(
        &self,
        state: &CacheState<E>,
        key: &E::GroupKey,
    ) -> Selection<Arc<[Arc<E>]>> {
        match state.group(key) {
            Some(group) => Selection {
                data: Arc::clone(&group.items),
                is_loading: group.status.is_loading(),
                error: group.status.error().cloned(),
            },
            None => Selection::ready(Arc::clone(&self.empty_items)),
        }
    }

    /// The projection's window with every item read through the cache, so a
    /// record with a mutation in flight shows its optimistic value.
    pub fn search_result(
        &self,
        cache: &CacheState<E>,
        projection: &ProjectionState<E>,
    ) -> Selection<Arc<EntityWindow<E>>> {
        let data = match &projection.window {
            Some(window) => self.resolve(cache, window),
            None => Arc::clone(&self.empty_window),
        };
        Selection {
            data,
            is_loading: projection.status.is_loading(),
            error: projection.status.error().cloned(),
        }
    }

    /// Whether a mutation is in flight for `id`, with the key's last error.
    pub fn operation_in_progress(&self, state: &CacheState<E>, id: &E::Id) -> Selection<bool> {
        match state.entry(id) {
            Some(entry) => Selection {
                data: entry.is_mutating(),
                is_loading: entry.is_mutating() || entry.status.is_loading(),
                error: entry.status.error().cloned(),
            },
            None => Selection::ready(false),
        }
    }

    pub fn is_loading(&self, state: &CacheState<E>, id: &E::Id) -> bool {
        state
            .entry(id)
            .map(|entry| entry.status.is_loading())
            .unwrap_or(false)
    }

    fn resolve(&self, cache: &CacheState<E>, window: &Arc<EntityWindow<E>>) -> Arc<EntityWindow<E>> {
        let mut last = self.last_window.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(memo) = last.as_ref() {
            if memo.cache_version == cache.version() && Arc::ptr_eq(&memo.source, window) {
                return Arc::clone(&memo.resolved);
            }
        }

        let stale = window.items().iter().any(|item| {
            cache
                .value(item.id())
                .is_some_and(|cached| !Arc::ptr_eq(cached, item))
        });
        let resolved = if stale {
            let items = window
                .items()
                .iter()
                .map(|item| cache.value(item.id()).cloned().unwrap_or_else(|| Arc::clone(item)))
                .collect();
            Arc::new(SearchWindow::new(
                items,
                window.total_count(),
                window.page(),
                window.per_page(),
            ))
        } else {
            Arc::clone(window)
        };

        *last = Some(ResolvedWindow {
            cache_version: cache.version(),
            source: Arc::clone(window),
            resolved: Arc::clone(&resolved),
        });
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{reduce, Action};
    use chrono::Utc;
    use coachdesk_core::{CommentId, Comment, PostId, UserId};

    fn comment(id: &str, content: &str) -> Arc<Comment> {
        let now = Utc::now();
        Arc::new(Comment {
            id: CommentId::from(id),
            post_id: PostId::from("post-1"),
            author_id: UserId::from("author-1"),
            parent_id: None,
            content: content.to_string(),
            like_count: 0,
            is_edited: false,
            created_at: now,
            updated_at: now,
        })
    }

    fn apply(state: CacheState<Comment>, action: Action<Comment>) -> CacheState<Comment> {
        reduce(&state, action).unwrap()
    }

    #[test]
    fn test_missing_keys_share_empty_values() {
        let selectors = Selectors::<Comment>::new(20);
        let state = CacheState::default();
        let first = selectors.items_for_key(&state, &PostId::from("nope"));
        let second = selectors.items_for_key(&state, &PostId::from("other"));
        assert!(Arc::ptr_eq(&first.data, &second.data));
        assert!(first.data.is_empty());

        let projection = ProjectionState::default();
        let a = selectors.search_result(&state, &projection);
        let b = selectors.search_result(&state, &projection);
        assert!(Arc::ptr_eq(&a.data, &b.data));
        assert!(Arc::ptr_eq(&a.data, selectors.empty_window()));
    }

    #[test]
    fn test_entity_by_id_reports_failure() {
        let selectors = Selectors::<Comment>::new(20);
        let id = CommentId::from("c-1");
        let state = apply(CacheState::default(), Action::FetchStarted { id: id.clone(), token: 1 });
        assert!(selectors.is_loading(&state, &id));

        let state = apply(
            state,
            Action::FetchFailed {
                id: id.clone(),
                token: 1,
                error: DeskError::backend("down"),
            },
        );
        let selection = selectors.entity_by_id(&state, &id);
        assert!(selection.data.is_none());
        assert!(!selection.is_loading);
        assert_eq!(selection.error, Some(DeskError::backend("down")));
    }

    #[test]
    fn test_search_result_shows_optimistic_values() {
        let selectors = Selectors::<Comment>::new(20);
        let original = comment("c-1", "first");
        let state = apply(
            CacheState::default(),
            Action::Upsert {
                values: vec![original.clone()],
                token: 1,
            },
        );
        let projection = ProjectionState {
            window: Some(Arc::new(SearchWindow::new(vec![original.clone()], 1, 1, 20))),
            ..ProjectionState::default()
        };
        let unchanged = selectors.search_result(&state, &projection);
        assert!(Arc::ptr_eq(&unchanged.data, projection.window.as_ref().unwrap()));

        let edited = comment("c-1", "edited");
        let state = apply(
            state,
            Action::OptimisticApplied {
                id: original.id.clone(),
                token: 2,
                value: edited.clone(),
            },
        );
        let resolved = selectors.search_result(&state, &projection);
        assert_eq!(resolved.data.items()[0].content, "edited");
        let again = selectors.search_result(&state, &projection);
        assert!(Arc::ptr_eq(&resolved.data, &again.data));

        let busy = selectors.operation_in_progress(&state, &original.id);
        assert!(busy.data);
    }
}
