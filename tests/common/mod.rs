//! Shared helpers for integration tests

#![allow(dead_code)]

use docstore_cache_core::InMemoryRemoteStore;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG` controls the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Zero-padded keys so sorted order matches numeric order
pub fn keys(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}{:02}", prefix, i)).collect()
}

/// Remote store holding one station document per key
pub async fn seeded_remote(collection: &str, keys: &[String], batch_limit: usize) -> Arc<InMemoryRemoteStore> {
    let remote = Arc::new(InMemoryRemoteStore::new(batch_limit));
    for key in keys {
        remote
            .insert(collection, key, json!({ "id": key, "name": format!("Station {}", key) }))
            .await;
    }
    remote
}
