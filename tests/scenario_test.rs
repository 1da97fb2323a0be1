//! End-to-end scenario: a station list screen backed by a small volatile
//! cache, a batched reader and optimistic favorite toggles.

mod common;

use common::seeded_remote;
use docstore_cache_core::{
    remote_commit, BatchFetchCoordinator, CacheConfig, CacheStore, FetchConfig, FetchOptions,
    InMemoryRemoteStore, MutationConfig, Namespace, NamespaceConfig, OptimisticMutationCoordinator,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn station_ids() -> Vec<String> {
    ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_small_volatile_cache_evicts_least_recent() {
    common::init_tracing();

    let cache_config = CacheConfig::empty()
        .with_namespace(Namespace::Volatile, NamespaceConfig::new(Duration::from_secs(300), 3));
    let store = Arc::new(CacheStore::new(cache_config).unwrap());
    let remote = seeded_remote("stations", &station_ids(), 2).await;

    // One chunk at a time so insertion order is deterministic
    let fetch_config = FetchConfig {
        batch_limit: 2,
        max_parallel_chunks: 1,
        ..FetchConfig::default()
    };
    let fetcher = BatchFetchCoordinator::new(Arc::clone(&store), remote.clone(), fetch_config).unwrap();

    let outcome = fetcher
        .fetch_many(station_ids(), &FetchOptions::new("stations", Namespace::Volatile))
        .await
        .unwrap();

    assert_eq!(outcome.resolved.len(), 4);
    assert_eq!(remote.fetch_batch_sizes(), vec![2, 2]);

    let stats = store.statistics();
    assert_eq!(stats.evictions, 1);
    assert_eq!(store.len(&Namespace::Volatile).unwrap(), 3);
    assert!(!store.contains(&Namespace::Volatile, "s1").unwrap());
    for id in ["s2", "s3", "s4"] {
        assert!(store.contains(&Namespace::Volatile, id).unwrap());
    }

    // Evicted key is fetched again on the next read
    fetcher
        .fetch_many(["s1"], &FetchOptions::new("stations", Namespace::Volatile))
        .await
        .unwrap();
    assert_eq!(remote.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_favorite_toggle_visible_before_commit() {
    let store = Arc::new(CacheStore::with_defaults());
    let remote = seeded_remote("stations", &station_ids(), 10).await;
    let fetcher = BatchFetchCoordinator::with_defaults(Arc::clone(&store), remote.clone()).unwrap();
    let favorites =
        OptimisticMutationCoordinator::new(Arc::clone(&store), Namespace::Volatile, MutationConfig::for_interactive())
            .unwrap();

    let outcome = fetcher
        .fetch_many(station_ids(), &FetchOptions::new("stations", Namespace::Static))
        .await
        .unwrap();
    assert!(outcome.is_complete());

    let commit = remote_commit(remote.clone(), "favorites");
    favorites.mutate("fav:s2", &json!({"station": "s2", "on": true}), commit).unwrap();

    // The UI reads its own write immediately
    let fav = store.get_document(&Namespace::Volatile, "fav:s2").unwrap();
    assert_eq!(fav, Some(json!({"station": "s2", "on": true})));
    assert_eq!(remote.write_count(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(remote.write_count(), 1);
    assert_eq!(
        remote.document("favorites", "fav:s2").await,
        Some(json!({"station": "s2", "on": true}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_toggle_during_slow_fetch_is_not_overwritten() {
    common::init_tracing();
    let store = Arc::new(CacheStore::with_defaults());
    let remote = Arc::new(InMemoryRemoteStore::new(10).with_latency(Duration::from_millis(100)));
    remote.insert("favorites", "fav:s1", json!({"station": "s1", "on": false})).await;

    let fetcher = BatchFetchCoordinator::with_defaults(Arc::clone(&store), remote.clone()).unwrap();
    let favorites =
        OptimisticMutationCoordinator::new(Arc::clone(&store), Namespace::Volatile, MutationConfig::for_interactive())
            .unwrap();
    let commit = remote_commit(remote.clone(), "favorites");

    // The read goes out first; the user toggles while it is still in flight
    let opts = FetchOptions::new("favorites", Namespace::Volatile);
    let (outcome, _) = tokio::join!(fetcher.fetch_many(["fav:s1"], &opts), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        favorites
            .mutate("fav:s1", &json!({"station": "s1", "on": true}), commit.clone())
            .unwrap();
    });
    assert!(outcome.unwrap().is_complete());

    let toggled = Some(json!({"station": "s1", "on": true}));
    assert_eq!(store.get_document(&Namespace::Volatile, "fav:s1").unwrap(), toggled);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(remote.write_count(), 1);
    assert_eq!(remote.document("favorites", "fav:s1").await, toggled);
    assert_eq!(store.get_document(&Namespace::Volatile, "fav:s1").unwrap(), toggled);
}
