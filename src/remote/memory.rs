//! In-memory remote store
//!
//! Complete [`RemoteStore`] implementation backed by a map of collections.
//! Enforces a batch limit like a real document store, records every call,
//! and can inject latency and failures.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Ack, RemoteStore};
use crate::types::{lock, Document, RemoteError};

/// A call received by the in-memory store
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    FetchByKeys {
        collection: String,
        keys: Vec<String>,
    },
    FetchByField {
        collection: String,
        field: String,
        values: Vec<Value>,
    },
    Write {
        collection: String,
        id: String,
        data: Document,
    },
}

/// Simple in-memory document store
pub struct InMemoryRemoteStore {
    collections: RwLock<HashMap<String, HashMap<String, Document>>>,
    batch_limit: usize,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<RemoteCall>>,
    failing_keys: Mutex<HashSet<String>>,
    fail_writes: AtomicBool,
    /// Fetches currently being served, and the highest count seen
    active_fetches: AtomicUsize,
    peak_fetches: AtomicUsize,
}

/// Counts a fetch as active until dropped
struct ActiveFetch<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveFetch<'a> {
    fn enter(store: &'a InMemoryRemoteStore) -> Self {
        let now = store.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak_fetches.fetch_max(now, Ordering::SeqCst);
        Self {
            active: &store.active_fetches,
        }
    }
}

impl Drop for ActiveFetch<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryRemoteStore {
    /// Create a store that rejects batches larger than `batch_limit`
    pub fn new(batch_limit: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            batch_limit,
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            failing_keys: Mutex::new(HashSet::new()),
            fail_writes: AtomicBool::new(false),
            active_fetches: AtomicUsize::new(0),
            peak_fetches: AtomicUsize::new(0),
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Insert or replace a document
    pub async fn insert(&self, collection: &str, id: &str, document: Document) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    /// Read a document directly, bypassing the call log
    pub async fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Fail any fetch whose batch contains one of these keys (or field values)
    pub fn fail_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.failing_keys).extend(keys.into_iter().map(Into::into));
    }

    /// Make every write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Sizes of the fetch batches received so far
    pub fn fetch_batch_sizes(&self) -> Vec<usize> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RemoteCall::FetchByKeys { keys, .. } => Some(keys.len()),
                RemoteCall::FetchByField { values, .. } => Some(values.len()),
                RemoteCall::Write { .. } => None,
            })
            .collect()
    }

    /// Number of fetch calls received
    pub fn fetch_count(&self) -> usize {
        self.fetch_batch_sizes().len()
    }

    /// Highest number of fetches served at the same time
    pub fn peak_concurrent_fetches(&self) -> usize {
        self.peak_fetches.load(Ordering::SeqCst)
    }

    /// Number of write calls received (successful or not)
    pub fn write_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, RemoteCall::Write { .. }))
            .count()
    }

    fn record(&self, call: RemoteCall) {
        lock(&self.calls).push(call);
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_batch(&self, len: usize) -> Result<(), RemoteError> {
        if len > self.batch_limit {
            return Err(RemoteError::Rejected(format!(
                "batch of {} exceeds limit of {}",
                len, self.batch_limit
            )));
        }
        Ok(())
    }

    fn check_failures<K: AsRef<str>>(&self, mut keys: impl Iterator<Item = K>) -> Result<(), RemoteError> {
        let failing = lock(&self.failing_keys);
        match keys.find(|key| failing.contains(key.as_ref())) {
            Some(key) => Err(RemoteError::Unavailable(format!(
                "simulated failure for {}",
                key.as_ref()
            ))),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait::async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn fetch_by_keys(
        &self,
        collection: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Document>, RemoteError> {
        self.record(RemoteCall::FetchByKeys {
            collection: collection.to_string(),
            keys: keys.to_vec(),
        });
        let _active = ActiveFetch::enter(self);
        self.simulate_latency().await;
        self.check_batch(keys.len())?;
        self.check_failures(keys.iter().map(String::as_str))?;

        let collections = self.collections.read().await;
        let found: HashMap<String, Document> = match collections.get(collection) {
            Some(docs) => keys
                .iter()
                .filter_map(|key| docs.get(key).map(|doc| (key.clone(), doc.clone())))
                .collect(),
            None => HashMap::new(),
        };

        debug!(collection, requested = keys.len(), found = found.len(), "In-memory fetch by keys");
        Ok(found)
    }

    async fn fetch_by_field(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>, RemoteError> {
        self.record(RemoteCall::FetchByField {
            collection: collection.to_string(),
            field: field.to_string(),
            values: values.to_vec(),
        });
        let _active = ActiveFetch::enter(self);
        self.simulate_latency().await;
        self.check_batch(values.len())?;
        self.check_failures(values.iter().map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }))?;

        let collections = self.collections.read().await;
        let found: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| doc.get(field).is_some_and(|v| values.contains(v)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        debug!(collection, field, requested = values.len(), found = found.len(), "In-memory fetch by field");
        Ok(found)
    }

    async fn write_field(
        &self,
        collection: &str,
        id: &str,
        data: &Document,
    ) -> Result<Ack, RemoteError> {
        self.record(RemoteCall::Write {
            collection: collection.to_string(),
            id: id.to_string(),
            data: data.clone(),
        });
        self.simulate_latency().await;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable(format!("simulated write failure for {}", id)));
        }

        self.insert(collection, id, data.clone()).await;
        Ok(Ack { id: id.to_string() })
    }
}
