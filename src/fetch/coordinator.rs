//! Batch fetch coordinator
//!
//! Resolves a set of keys with as few remote calls as possible:
//!
//! ```text
//! keys → CacheStore (fresh hits)
//!          ↓ miss
//!        In-flight registry (join a chunk already fetching the key)
//!          ↓ not in flight
//!        Chunks of ≤ N keys → RemoteStore (bounded parallelism, timeout)
//! ```
//!
//! A failing chunk only fails its own keys. Everything else is returned.

use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::options::{FetchOptions, FetchOutcome, FetchQuery};
use super::registry::{chunk_signature, ChunkResult, InFlightRegistry, SharedChunk};
use crate::cache::{CacheStore, Namespace};
use crate::config::FetchConfig;
use crate::remote::RemoteStore;
use crate::types::{lock, CacheError, Document, FetchError, Result};

/// State shared with spawned chunk tasks
struct FetchInner {
    store: Arc<CacheStore>,
    remote: Arc<dyn RemoteStore>,
    config: FetchConfig,
    /// Limits concurrently dispatched chunks
    limiter: Semaphore,
    registry: Mutex<InFlightRegistry>,
    disposed: AtomicBool,
}

/// Everything a chunk task needs to know about its request
#[derive(Clone)]
struct ChunkRequest {
    signature: String,
    collection: String,
    namespace: Namespace,
    query: FetchQuery,
    ttl: Option<std::time::Duration>,
    keys: Vec<String>,
    /// Cache write version at dispatch; entries written later are kept
    since: u64,
}

/// Coordinates cache lookups, in-flight deduplication and chunked remote fetches.
///
/// Dropping the coordinator cancels every chunk it still has in flight.
pub struct BatchFetchCoordinator {
    inner: Arc<FetchInner>,
}

impl BatchFetchCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        remote: Arc<dyn RemoteStore>,
        config: FetchConfig,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            batch_limit = config.batch_limit,
            max_parallel_chunks = config.max_parallel_chunks,
            request_timeout_ms = config.request_timeout_ms,
            "BatchFetchCoordinator initialized"
        );

        Ok(Self {
            inner: Arc::new(FetchInner {
                store,
                remote,
                limiter: Semaphore::new(config.max_parallel_chunks),
                config,
                registry: Mutex::new(InFlightRegistry::default()),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Create with default configuration
    pub fn with_defaults(store: Arc<CacheStore>, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        Self::new(store, remote, FetchConfig::default())
    }

    /// Resolve `keys`, returning every key that could be served even when
    /// some chunks fail.
    ///
    /// Only caller misuse is returned as `Err`: unknown namespace, empty key,
    /// a batch limit of zero or above the configured one, or a disposed
    /// coordinator. Must be called within a Tokio runtime.
    pub async fn fetch_many<I, S>(&self, keys: I, options: &FetchOptions) -> Result<FetchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(CacheError::Disposed);
        }

        let batch_limit = match options.batch_limit {
            Some(requested) if requested > self.inner.config.batch_limit => {
                return Err(CacheError::BatchLimitExceeded {
                    len: requested,
                    limit: self.inner.config.batch_limit,
                });
            }
            Some(requested) => requested,
            None => self.inner.config.batch_limit,
        };
        if batch_limit == 0 {
            return Err(CacheError::InvalidConfig("batch limit must be at least 1".into()));
        }
        if !self.inner.store.has_namespace(&options.namespace) {
            return Err(CacheError::UnknownNamespace(options.namespace.to_string()));
        }

        // Sorted and deduplicated
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        if keys.iter().any(String::is_empty) {
            return Err(CacheError::InvalidKey("key must not be empty".into()));
        }

        let mut outcome = FetchOutcome::default();
        if keys.is_empty() {
            return Ok(outcome);
        }

        // Partition under the registry lock. A chunk populates the cache
        // before it unregisters, so every key is either cached, in flight,
        // or ours to dispatch.
        let scope = options.scope();
        let mut waits: Vec<(SharedChunk, Vec<String>)> = Vec::new();
        let mut joined_count = 0;
        let cache_hits;
        {
            let mut registry = lock(&self.inner.registry);

            // (a) cache hits
            let mut uncached = Vec::new();
            let mut revalidate = Vec::new();
            for key in keys {
                let cache_key = options.query.cache_key(&key);
                match self.inner.store.lookup(&options.namespace, &cache_key)? {
                    Some(lookup) => {
                        if lookup.stale {
                            outcome.stale.insert(key.clone());
                            if options.revalidate_stale {
                                revalidate.push(key.clone());
                            }
                        }
                        outcome.resolved.insert(key, lookup.value);
                    }
                    None => uncached.push(key),
                }
            }

            cache_hits = outcome.resolved.len();
            if uncached.is_empty() && revalidate.is_empty() {
                debug!(collection = %options.collection, hits = cache_hits, "Fetch served from cache");
                return Ok(outcome);
            }

            // (b) join in-flight chunks
            let mut joined: HashMap<String, (SharedChunk, Vec<String>)> = HashMap::new();
            let mut fresh = Vec::new();
            for key in uncached {
                match registry.lookup(&scope, &key) {
                    Some((signature, future)) => {
                        joined_count += 1;
                        joined
                            .entry(signature)
                            .or_insert_with(|| (future, Vec::new()))
                            .1
                            .push(key);
                    }
                    None => fresh.push(key),
                }
            }
            waits.extend(joined.into_values());

            // (c) dispatch the rest
            for chunk in fresh.chunks(batch_limit) {
                let future = dispatch_chunk(&self.inner, &mut registry, &scope, chunk.to_vec(), options);
                waits.push((future, chunk.to_vec()));
            }

            // Stale-while-revalidate: refresh without awaiting
            let refresh: Vec<String> = revalidate
                .into_iter()
                .filter(|key| registry.lookup(&scope, key).is_none())
                .collect();
            for chunk in refresh.chunks(batch_limit) {
                debug!(collection = %options.collection, keys = chunk.len(), "Revalidating stale entries");
                dispatch_chunk(&self.inner, &mut registry, &scope, chunk.to_vec(), options);
            }
        }

        debug!(
            collection = %options.collection,
            hits = cache_hits,
            joined = joined_count,
            chunks = waits.len(),
            "Fetch partitioned"
        );

        // Merge
        let results = join_all(
            waits
                .into_iter()
                .map(|(future, keys)| async move { (future.await, keys) }),
        )
        .await;

        for (result, keys) in results {
            match result.as_ref() {
                Ok(documents) => {
                    for key in keys {
                        match documents.get(&key) {
                            Some(document) => {
                                outcome.resolved.insert(key, document.clone());
                            }
                            None => {
                                outcome.missing.insert(key);
                            }
                        }
                    }
                }
                Err(err) => {
                    for key in keys {
                        outcome.failed.insert(key, err.clone());
                    }
                }
            }
        }

        if !outcome.failed.is_empty() {
            warn!(
                collection = %options.collection,
                resolved = outcome.resolved.len(),
                failed = outcome.failed.len(),
                "Fetch completed with failed chunks"
            );
        }

        Ok(outcome)
    }

    /// Number of chunks currently in flight
    pub fn in_flight_count(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Cancel every in-flight chunk and refuse further fetches.
    ///
    /// Callers waiting on a cancelled chunk see its keys in `failed` with
    /// [`FetchError::Cancelled`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.limiter.close();
        let aborted = lock(&self.inner.registry).abort_all();
        info!(aborted, "BatchFetchCoordinator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for BatchFetchCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Spawn a chunk task and register it. Caller holds the registry lock, so
/// the task cannot complete (and unregister) before it is registered.
fn dispatch_chunk(
    inner: &Arc<FetchInner>,
    registry: &mut InFlightRegistry,
    scope: &str,
    keys: Vec<String>,
    options: &FetchOptions,
) -> SharedChunk {
    let chunk = ChunkRequest {
        signature: chunk_signature(scope, &keys),
        collection: options.collection.clone(),
        namespace: options.namespace.clone(),
        query: options.query.clone(),
        ttl: options.ttl,
        keys: keys.clone(),
        since: inner.store.write_version(),
    };
    let signature = chunk.signature.clone();

    let handle = tokio::spawn(run_chunk(Arc::clone(inner), chunk));
    let abort = handle.abort_handle();

    let future: SharedChunk = handle
        .map(|joined| match joined {
            Ok(result) => result,
            Err(_) => Arc::new(Err(FetchError::Cancelled)),
        })
        .boxed()
        .shared();

    registry.register(signature, scope, keys, future.clone(), abort);
    future
}

/// Fetch one chunk, populate the cache, then unregister
async fn run_chunk(inner: Arc<FetchInner>, chunk: ChunkRequest) -> ChunkResult {
    let result = match inner.limiter.acquire().await {
        Ok(_permit) => fetch_remote(&inner, &chunk).await,
        Err(_) => Err(FetchError::Cancelled),
    };

    match &result {
        Ok(documents) => {
            // Requested order keeps LRU order deterministic
            for (key, document) in chunk.keys.iter().filter_map(|k| documents.get_key_value(k)) {
                let cache_key = chunk.query.cache_key(key);
                if let Err(e) = inner.store.set_document_if_unchanged_since(
                    &chunk.namespace,
                    &cache_key,
                    document.clone(),
                    chunk.ttl,
                    chunk.since,
                ) {
                    warn!(key = %cache_key, error = %e, "Failed to cache fetched document");
                }
            }
            debug!(
                collection = %chunk.collection,
                signature = %chunk.signature,
                requested = chunk.keys.len(),
                found = documents.len(),
                "Chunk fetched"
            );
        }
        Err(e) => {
            warn!(
                collection = %chunk.collection,
                signature = %chunk.signature,
                keys = chunk.keys.len(),
                error = %e,
                "Chunk fetch failed"
            );
        }
    }

    // Cache is populated before the chunk leaves the registry, so a
    // concurrent caller always sees one or the other
    lock(&inner.registry).complete(&chunk.signature);
    Arc::new(result)
}

async fn fetch_remote(
    inner: &FetchInner,
    chunk: &ChunkRequest,
) -> std::result::Result<HashMap<String, Document>, FetchError> {
    let timeout = inner.config.request_timeout();

    match &chunk.query {
        FetchQuery::ByKey => {
            let call = inner.remote.fetch_by_keys(&chunk.collection, &chunk.keys);
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(documents)) => Ok(documents),
                Ok(Err(e)) => Err(FetchError::Remote(e)),
                Err(_) => Err(FetchError::Timeout(timeout)),
            }
        }
        FetchQuery::ByField { field } => {
            let values: Vec<Value> = chunk.keys.iter().map(|key| field_value(key)).collect();
            let call = inner.remote.fetch_by_field(&chunk.collection, field, &values);
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(documents)) => Ok(match_by_field(field, &chunk.keys, documents)),
                Ok(Err(e)) => Err(FetchError::Remote(e)),
                Err(_) => Err(FetchError::Timeout(timeout)),
            }
        }
    }
}

/// Typed field value for a key: JSON numbers and booleans as such,
/// anything else as a string
fn field_value(key: &str) -> Value {
    match serde_json::from_str::<Value>(key) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(key.to_string()),
    }
}

/// Group documents returned by a field query under the requested value they
/// carry. Each value resolves to an array of every matching document, in
/// the order the remote store returned them.
fn match_by_field(
    field: &str,
    requested: &[String],
    documents: Vec<Document>,
) -> HashMap<String, Document> {
    let typed: Vec<(&String, Value)> = requested.iter().map(|key| (key, field_value(key))).collect();

    let mut matched: HashMap<String, Vec<Document>> = HashMap::new();
    for document in documents {
        let Some(value) = document.get(field) else {
            continue;
        };
        if let Some((key, _)) = typed.iter().find(|(_, wanted)| wanted == value) {
            matched.entry((*key).clone()).or_default().push(document);
        }
    }

    matched
        .into_iter()
        .map(|(key, documents)| (key, Value::Array(documents)))
        .collect()
}
