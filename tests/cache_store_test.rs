//! Cache store integration tests
//!
//! Covers:
//! - Set/get round trips with typed values
//! - TTL expiry, lazy and swept
//! - LRU eviction per namespace
//! - Offline mode serving stale entries

mod common;

use docstore_cache_core::{
    spawn_sweeper, CacheConfig, CacheError, CacheStore, Namespace, NamespaceConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Station {
    id: String,
    flow: f64,
}

fn station(id: &str, flow: f64) -> Station {
    Station { id: id.to_string(), flow }
}

fn small_store(capacity: usize, ttl: Duration) -> CacheStore {
    let config = CacheConfig::empty().with_namespace(Namespace::Volatile, NamespaceConfig::new(ttl, capacity));
    CacheStore::new(config).unwrap()
}

// =============================================================================
// Round Trip & Expiry
// =============================================================================

#[tokio::test]
async fn test_typed_round_trip() {
    common::init_tracing();
    let store = CacheStore::with_defaults();

    store
        .set(&Namespace::Static, "08NA011", &station("08NA011", 12.5), Some(Duration::from_secs(60)))
        .unwrap();

    let cached: Option<Station> = store.get(&Namespace::Static, "08NA011").unwrap();
    assert_eq!(cached, Some(station("08NA011", 12.5)));
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    let store = CacheStore::with_defaults();
    store
        .set(&Namespace::Volatile, "k", &1, Some(Duration::from_millis(1)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(store.get::<i32>(&Namespace::Volatile, "k").unwrap(), None);
    assert_eq!(store.statistics().expirations, 1);
    assert_eq!(store.len(&Namespace::Volatile).unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_purges_unread_entries() {
    let store = Arc::new(CacheStore::with_defaults());
    store
        .set(&Namespace::Static, "cold", &"value", Some(Duration::from_secs(1)))
        .unwrap();
    let _sweeper = spawn_sweeper(&store, Duration::from_secs(5));

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(store.len(&Namespace::Static).unwrap(), 0);
}

// =============================================================================
// LRU Eviction
// =============================================================================

#[tokio::test]
async fn test_lru_evicts_oldest_entry() {
    let store = small_store(2, Duration::from_secs(300));

    store.set(&Namespace::Volatile, "a", &1, None).unwrap();
    store.set(&Namespace::Volatile, "b", &2, None).unwrap();
    store.set(&Namespace::Volatile, "c", &3, None).unwrap();

    assert!(!store.contains(&Namespace::Volatile, "a").unwrap());
    assert!(store.contains(&Namespace::Volatile, "b").unwrap());
    assert!(store.contains(&Namespace::Volatile, "c").unwrap());
    assert_eq!(store.statistics().evictions, 1);
}

#[tokio::test]
async fn test_read_refreshes_recency() {
    let store = small_store(2, Duration::from_secs(300));

    store.set(&Namespace::Volatile, "a", &1, None).unwrap();
    store.set(&Namespace::Volatile, "b", &2, None).unwrap();
    store.get::<i32>(&Namespace::Volatile, "a").unwrap();
    store.set(&Namespace::Volatile, "c", &3, None).unwrap();

    assert!(store.contains(&Namespace::Volatile, "a").unwrap());
    assert!(!store.contains(&Namespace::Volatile, "b").unwrap());
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let store = CacheStore::with_defaults();
    store
        .register_namespace(Namespace::custom("tiles"), NamespaceConfig::new(Duration::from_secs(30), 1))
        .unwrap();

    store.set(&Namespace::Static, "k", &"static", None).unwrap();
    store.set(&Namespace::custom("tiles"), "k", &"tile-1", None).unwrap();
    store.set(&Namespace::custom("tiles"), "k2", &"tile-2", None).unwrap();

    assert_eq!(store.get::<String>(&Namespace::Static, "k").unwrap().as_deref(), Some("static"));
    assert!(!store.contains(&Namespace::custom("tiles"), "k").unwrap());
    assert_eq!(store.len(&Namespace::custom("tiles")).unwrap(), 1);

    let stats = store.statistics();
    assert_eq!(stats.total_entries(), 2);
}

// =============================================================================
// Offline Mode
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_offline_mode_serves_stale_entries() {
    let store = CacheStore::with_defaults();
    store
        .set(&Namespace::Volatile, "flow", &42, Some(Duration::from_secs(1)))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    store.set_offline_mode(true);

    let lookup = store.lookup(&Namespace::Volatile, "flow").unwrap().unwrap();
    assert!(lookup.stale);
    assert_eq!(lookup.into_value::<i32>().unwrap(), 42);

    // Nothing is purged while offline
    assert_eq!(store.purge_expired(), 0);

    store.set_offline_mode(false);
    assert_eq!(store.get::<i32>(&Namespace::Volatile, "flow").unwrap(), None);
}

// =============================================================================
// Caller Misuse
// =============================================================================

#[test]
fn test_misuse_is_reported() {
    let store = CacheStore::with_defaults();

    assert!(matches!(
        store.get::<i32>(&Namespace::custom("nope"), "k"),
        Err(CacheError::UnknownNamespace(_))
    ));
    assert!(matches!(
        store.set(&Namespace::Static, "", &1, None),
        Err(CacheError::InvalidKey(_))
    ));
    assert!(matches!(
        store.register_namespace(Namespace::custom("zero"), NamespaceConfig::new(Duration::from_secs(1), 0)),
        Err(CacheError::InvalidConfig(_))
    ));
}

#[test]
fn test_prefix_invalidation() {
    let store = CacheStore::with_defaults();
    for id in ["run:1", "run:2", "station:1"] {
        store.set(&Namespace::Static, id, &id, None).unwrap();
    }

    assert_eq!(store.invalidate_prefix(&Namespace::Static, "run:").unwrap(), 2);
    assert!(store.contains(&Namespace::Static, "station:1").unwrap());
}
