//! Invariants of the keyed cache, the mutation engine and the projection,
//! checked against the in-memory backend.

use std::sync::Arc;

use coachdesk_core::{
    CenterCategory, CenterFilters, CenterId, CenterPatch, CenterSortField, CoachingCenter,
    DeskError, Session, SortSpec, StoreConfig, UserId,
};
use coachdesk_store::{EntityQuery, EntityStore, InMemoryBackend, Operation};
use coachdesk_test_utils::{fixtures, generators};
use futures_util::future::join_all;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

type Backend = Arc<InMemoryBackend<CoachingCenter>>;
type Store = EntityStore<CoachingCenter, Backend>;

fn store(records: Vec<CoachingCenter>) -> (Store, Backend) {
    let backend = Arc::new(InMemoryBackend::with_records(records));
    (
        EntityStore::new(backend.clone(), StoreConfig::default()).unwrap(),
        backend,
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

fn owner() -> UserId {
    UserId::from("owner-1")
}

// ============================================================================
// SINGLE-FLIGHT AND STALE WRITES
// ============================================================================

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
    let (store, backend) = store(vec![fixtures::center("center-1", &owner())]);
    let session = Session::anonymous();
    let id = CenterId::from("center-1");
    backend.close_gate();

    let gets = (0..5).map(|_| store.get(&session, &id));
    let (results, ()) = tokio::join!(join_all(gets), async { backend.open_gate() });

    let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(backend.calls(Operation::Fetch), 1);

    let stats = store.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 4);
}

#[tokio::test]
async fn test_reload_joins_fetch_in_flight() {
    let (store, backend) = store(vec![fixtures::center("center-1", &owner())]);
    let session = Session::anonymous();
    let id = CenterId::from("center-1");
    backend.close_gate();

    let (a, b, ()) = tokio::join!(
        store.get(&session, &id),
        store.reload(&session, &id),
        async { backend.open_gate() },
    );
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(backend.calls(Operation::Fetch), 1);

    // Without a fetch in flight, reload goes to the backend.
    store.reload(&session, &id).await.unwrap();
    assert_eq!(backend.calls(Operation::Fetch), 2);
}

#[tokio::test]
async fn test_concurrent_failure_reaches_every_waiter() {
    let (store, backend) = store(Vec::new());
    let session = Session::anonymous();
    let id = CenterId::from("center-1");
    backend.fail_next(Operation::Fetch, DeskError::backend("timeout"));
    backend.close_gate();

    let (a, b, ()) = tokio::join!(
        store.get(&session, &id),
        store.get(&session, &id),
        async { backend.open_gate() },
    );
    assert_eq!(a.unwrap_err(), DeskError::backend("timeout"));
    assert_eq!(b.unwrap_err(), DeskError::backend("timeout"));
    assert_eq!(backend.calls(Operation::Fetch), 1);
    assert_eq!(
        store.entity_by_id(&id).error,
        Some(DeskError::backend("timeout"))
    );
}

#[tokio::test]
async fn test_fetch_landing_after_remove_is_not_written() {
    let (store, backend) = store(vec![fixtures::center("center-1", &owner())]);
    let cache = store.cache().clone();
    let id = CenterId::from("center-1");
    backend.close_gate();

    let pending = {
        let cache = cache.clone();
        let id = id.clone();
        tokio::spawn(async move { cache.get(&Session::anonymous(), &id).await })
    };
    while backend.calls(Operation::Fetch) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(store.is_loading(&id));

    cache.remove(&id);
    backend.open_gate();

    // The waiter still gets its answer.
    let value = pending.await.unwrap().unwrap();
    assert_eq!(value.id, id);
    assert!(cache.snapshot().entry(&id).is_none());
    assert!(store.entity_by_id(&id).data.is_none());
}

#[tokio::test]
async fn test_fetch_landing_after_clear_is_not_written() {
    let (store, backend) = store(vec![fixtures::center("center-1", &owner())]);
    let id = CenterId::from("center-1");
    backend.close_gate();

    let session = Session::anonymous();
    let (result, ()) = tokio::join!(store.get(&session, &id), async {
        store.clear();
        backend.open_gate();
    });

    assert!(result.is_ok());
    assert!(store.cache().snapshot().is_empty());
}

// ============================================================================
// SELECTOR STABILITY AND CLEAR
// ============================================================================

#[tokio::test]
async fn test_selectors_return_same_reference_until_state_moves() {
    let records = fixtures::centers(3, CenterCategory::Sports, &owner());
    let (store, _backend) = store(records);
    let session = Session::anonymous();

    let empty_a = store.items_for_key(&UserId::from("nobody")).data;
    let empty_b = store.items_for_key(&UserId::from("somebody")).data;
    assert!(Arc::ptr_eq(&empty_a, &empty_b));

    store
        .search(&session, store.projection().default_query())
        .await
        .unwrap();
    let first = store.search_result().data;
    let second = store.search_result().data;
    assert!(Arc::ptr_eq(&first, &second));

    // A record outside the window changes nothing the window shows.
    store
        .cache()
        .upsert(vec![fixtures::center("center-999", &owner())]);
    assert!(Arc::ptr_eq(&first, &store.search_result().data));

    let target = first.items()[0].id.clone();
    store
        .update(
            &fixtures::owner_session(),
            &target,
            &CenterPatch {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let moved = store.search_result().data;
    assert!(!Arc::ptr_eq(&first, &moved));
    assert_eq!(moved.items()[0].name, "Renamed");
    assert!(Arc::ptr_eq(&moved, &store.search_result().data));

    let entity_a = store.entity_by_id(&target).data.unwrap();
    let entity_b = store.entity_by_id(&target).data.unwrap();
    assert!(Arc::ptr_eq(&entity_a, &entity_b));
}

#[tokio::test]
async fn test_clear_is_idempotent() {
    let (store, _backend) = store(fixtures::centers(4, CenterCategory::Sports, &owner()));
    let session = Session::anonymous();
    store.get(&session, &CenterId::from("center-000")).await.unwrap();

    let mut rx = store.cache().subscribe();
    store.clear();
    assert!(rx.has_changed().unwrap());
    let cleared = rx.borrow_and_update().clone();
    assert!(cleared.is_empty());

    store.clear();
    assert!(!rx.has_changed().unwrap());
    assert!(Arc::ptr_eq(&cleared, &store.cache().snapshot()));
    assert_eq!(store.stats().entry_count, 0);
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn rename(name: String) -> CenterPatch {
    CenterPatch {
        name: Some(name),
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After every settled update the cache holds exactly what the backend
    /// holds, whether the write was accepted or refused.
    #[test]
    fn prop_cache_matches_backend_after_each_update(
        steps in prop::collection::vec((generators::arb_center_name(), any::<bool>()), 1..8)
    ) {
        let outcome: Result<(), TestCaseError> = runtime().block_on(async {
            let (store, backend) = store(vec![fixtures::center("center-1", &owner())]);
            let session = fixtures::owner_session();
            let id = CenterId::from("center-1");

            for (name, refuse) in steps {
                let before = backend.record(&id).unwrap();
                if refuse {
                    backend.fail_next(Operation::Update, DeskError::backend("refused"));
                }
                let result = store.update(&session, &id, &rename(name.clone())).await;

                let cached = store.cache().peek(&id).unwrap();
                let stored = backend.record(&id).unwrap();
                prop_assert_eq!(&*cached, &stored);
                prop_assert!(!store.mutation_in_flight(&id));
                if refuse {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(&cached.name, &before.name);
                } else {
                    let updated = result.unwrap();
                    prop_assert_eq!(&updated.name, &name);
                }
            }
            Ok(())
        });
        outcome?;
    }

    /// Each page holds `min(per_page, remaining)` items and `has_more` is
    /// true exactly when items remain past it.
    #[test]
    fn prop_search_window_bounds(
        count in 0usize..90,
        per_page in 1u32..=40,
        page in 1u32..=6,
    ) {
        let outcome: Result<(), TestCaseError> = runtime().block_on(async {
            let records = fixtures::centers(count, CenterCategory::SchoolCoaching, &owner());
            let (store, _backend) = store(records);
            let query = EntityQuery::<CoachingCenter>::new(CenterFilters {
                category: Some(CenterCategory::SchoolCoaching),
                ..Default::default()
            })
            .sorted_by(SortSpec::asc(CenterSortField::Name))
            .with_page(page)
            .with_per_page(per_page);

            let window = store.search(&Session::anonymous(), query).await.unwrap();
            let skipped = (page as usize - 1) * per_page as usize;
            let expected = count.saturating_sub(skipped).min(per_page as usize);

            prop_assert_eq!(window.len(), expected);
            prop_assert_eq!(window.total_count(), count as u64);
            prop_assert_eq!(window.has_more(), count > page as usize * per_page as usize);
            for (offset, item) in window.items().iter().enumerate() {
                prop_assert_eq!(&item.name, &format!("Center {:03}", skipped + offset));
            }
            Ok(())
        });
        outcome?;
    }

    /// Walking `next_page` visits every match once, in order.
    #[test]
    fn prop_next_page_walks_every_match(count in 1usize..60, per_page in 1u32..=25) {
        let outcome: Result<(), TestCaseError> = runtime().block_on(async {
            let records = fixtures::centers(count, CenterCategory::LanguageTraining, &owner());
            let (store, backend) = store(records);
            let session = Session::anonymous();
            let query = store
                .projection()
                .default_query()
                .sorted_by(SortSpec::asc(CenterSortField::Name))
                .with_per_page(per_page);

            let mut window = store.search(&session, query).await.unwrap();
            let mut seen: Vec<String> = window.items().iter().map(|c| c.name.clone()).collect();
            while window.has_more() {
                window = store.next_page(&session).await.unwrap();
                seen.extend(window.items().iter().map(|c| c.name.clone()));
            }

            let expected: Vec<String> = (0..count).map(|i| format!("Center {:03}", i)).collect();
            prop_assert_eq!(seen, expected);
            let pages = count.div_ceil(per_page as usize);
            prop_assert_eq!(backend.calls(Operation::Search), pages);
            Ok(())
        });
        outcome?;
    }
}
