//! Cache store implementation
//!
//! Namespaced in-memory cache with lazy TTL expiry, O(log n) LRU eviction
//! and an expiry index for O(k) sweeps of expired entries.
//!
//! Each namespace is an independent shard behind its own lock, so a busy
//! namespace never blocks readers of another one.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::Namespace;
use crate::config::{duration_ms, CacheConfig, NamespaceConfig};
use crate::types::{CacheError, Document, Result};

// =============================================================================
// Entries
// =============================================================================

/// Longest lifetime an entry can have; larger TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// A cached value with its timing metadata. Never handed out by reference.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Document,
    inserted_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
    /// Position in the recency index
    access_tick: u64,
    /// Position in the expiry index (fixed until the entry is overwritten)
    insert_seq: u64,
    /// Store-wide write version of the last write to this key
    version: u64,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Result of a staleness-aware read
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// Copy of the cached document
    pub value: Document,
    /// True when the entry is past its TTL and was served because offline mode is on
    pub stale: bool,
    /// Time left before the entry expires (zero when stale)
    pub remaining_ttl: Duration,
}

impl Lookup {
    /// Deserialize the cached document into a typed value
    pub fn into_value<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.value)?)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to make room (LRU)
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    #[serde(serialize_with = "serialize_sizes")]
    pub size_per_namespace: BTreeMap<Namespace, usize>,
}

impl CacheStatistics {
    /// Hit rate as percentage (0-100)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total entries across all namespaces
    pub fn total_entries(&self) -> usize {
        self.size_per_namespace.values().sum()
    }
}

fn serialize_sizes<S: Serializer>(
    sizes: &BTreeMap<Namespace, usize>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(sizes.iter().map(|(ns, size)| (ns.as_str(), size)))
}

// =============================================================================
// Namespace Shard
// =============================================================================

/// Storage for one namespace
struct Shard {
    config: NamespaceConfig,
    entries: HashMap<String, CacheEntry>,
    /// access_tick -> key; first entry is the least recently used
    recency_index: BTreeMap<u64, String>,
    /// (expires_at, insert_seq) -> key; range scans find expired entries
    expiry_index: BTreeMap<(Instant, u64), String>,
    next_tick: u64,
}

impl Shard {
    fn new(config: NamespaceConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            recency_index: BTreeMap::new(),
            expiry_index: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Mark an entry as just used. O(log n)
    fn touch(&mut self, key: &str, now: Instant) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency_index.remove(&entry.access_tick);
            entry.access_tick = tick;
            entry.last_accessed = now;
            self.recency_index.insert(tick, key.to_string());
        }
    }

    /// Insert or overwrite, evicting LRU entries first if needed.
    /// Returns the number of evicted entries.
    fn insert(&mut self, key: &str, value: Document, ttl: Duration, now: Instant, version: u64) -> u64 {
        let mut evicted = 0;

        if self.entries.contains_key(key) {
            self.remove(key);
        } else {
            while self.entries.len() >= self.config.capacity {
                match self.evict_lru() {
                    Some(victim) => {
                        debug!(key = %victim, "Evicted least recently used entry");
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }

        let tick = self.tick();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl.min(MAX_TTL),
            last_accessed: now,
            access_tick: tick,
            insert_seq: tick,
            version,
        };

        self.recency_index.insert(tick, key.to_string());
        self.expiry_index
            .insert((entry.expires_at, entry.insert_seq), key.to_string());
        self.entries.insert(key.to_string(), entry);

        evicted
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency_index.remove(&entry.access_tick);
        self.expiry_index.remove(&(entry.expires_at, entry.insert_seq));
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency_index.pop_first()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.expiry_index.remove(&(entry.expires_at, entry.insert_seq));
        }
        Some(key)
    }

    /// Remove every entry that expired before `now`. O(k) in expired entries.
    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        for ((expires_at, _), key) in self.expiry_index.iter() {
            if *expires_at >= now {
                break;
            }
            expired.push(key.clone());
        }

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn remove_prefix(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency_index.clear();
        self.expiry_index.clear();
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// Namespaced TTL + LRU cache shared by the fetch and mutation coordinators.
///
/// Construct one instance per application and hand it around as
/// `Arc<CacheStore>`.
pub struct CacheStore {
    shards: DashMap<Namespace, Shard>,
    offline: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    write_version: AtomicU64,
}

impl CacheStore {
    /// Create a store with the namespaces of `config`
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let store = Self::empty();
        for (namespace, ns_config) in config.namespaces {
            store.shards.insert(namespace, Shard::new(ns_config));
        }
        info!(namespaces = store.shards.len(), "CacheStore initialized");
        Ok(store)
    }

    /// Create with the default `Static` and `Volatile` namespaces
    pub fn with_defaults() -> Self {
        let store = Self::empty();
        for (namespace, ns_config) in CacheConfig::default().namespaces {
            store.shards.insert(namespace, Shard::new(ns_config));
        }
        store
    }

    fn empty() -> Self {
        Self {
            shards: DashMap::new(),
            offline: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            write_version: AtomicU64::new(0),
        }
    }

    /// Register a namespace, or change the limits of an existing one.
    ///
    /// Shrinking capacity evicts least recently used entries immediately.
    pub fn register_namespace(&self, namespace: Namespace, config: NamespaceConfig) -> Result<()> {
        config.validate(&namespace)?;

        let mut shard = self
            .shards
            .entry(namespace.clone())
            .or_insert_with(|| Shard::new(config));
        shard.config = config;

        let mut evicted = 0;
        while shard.entries.len() > config.capacity {
            if shard.evict_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        drop(shard);

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(namespace = %namespace, capacity = config.capacity, ttl_ms = config.ttl_ms, "Namespace registered");
        Ok(())
    }

    /// Check if a namespace is registered
    pub fn has_namespace(&self, namespace: &Namespace) -> bool {
        self.shards.contains_key(namespace)
    }

    /// Default TTL of a namespace
    pub fn default_ttl(&self, namespace: &Namespace) -> Result<Duration> {
        self.shards
            .get(namespace)
            .map(|shard| shard.config.ttl())
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a typed copy of a cached value.
    ///
    /// Returns `None` on a miss or when the entry expired (unless offline
    /// mode is on, in which case the stale value is returned).
    pub fn get<T: DeserializeOwned>(&self, namespace: &Namespace, key: &str) -> Result<Option<T>> {
        match self.lookup(namespace, key)? {
            Some(lookup) => lookup.into_value().map(Some),
            None => Ok(None),
        }
    }

    /// Get a copy of the raw cached document
    pub fn get_document(&self, namespace: &Namespace, key: &str) -> Result<Option<Document>> {
        Ok(self.lookup(namespace, key)?.map(|lookup| lookup.value))
    }

    /// Staleness-aware read. Updates LRU bookkeeping and hit/miss counters.
    pub fn lookup(&self, namespace: &Namespace, key: &str) -> Result<Option<Lookup>> {
        validate_key(key)?;
        let offline = self.is_offline();
        let now = Instant::now();

        let mut shard = self.shard_mut(namespace)?;
        let expired = match shard.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %namespace, key, "Cache miss");
                return Ok(None);
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired && !offline {
            shard.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(namespace = %namespace, key, "Cache miss (expired)");
            return Ok(None);
        }

        shard.touch(key, now);
        let lookup = shard.entries.get(key).map(|entry| Lookup {
            value: entry.value.clone(),
            stale: expired,
            remaining_ttl: entry.expires_at.saturating_duration_since(now),
        });

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(namespace = %namespace, key, stale = expired, "Cache hit");
        Ok(lookup)
    }

    /// Check whether a fresh (or, offline, stale) entry exists without
    /// touching LRU order or counters.
    pub fn contains(&self, namespace: &Namespace, key: &str) -> Result<bool> {
        validate_key(key)?;
        let shard = self
            .shards
            .get(namespace)
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))?;
        Ok(shard
            .entries
            .get(key)
            .map(|entry| self.is_offline() || !entry.is_expired_at(Instant::now()))
            .unwrap_or(false))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a typed value. `ttl` defaults to the namespace TTL.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let document = serde_json::to_value(value)?;
        self.set_document(namespace, key, document, ttl)
    }

    /// Store a raw document. `ttl` defaults to the namespace TTL.
    pub fn set_document(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Document,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.write(namespace, key, value, ttl, None).map(|_| ())
    }

    /// Store a raw document unless `key` was written after version `since`
    /// (see [`write_version`](Self::write_version)). Returns whether it was
    /// stored.
    ///
    /// Lets a reader that started before a local write populate the cache
    /// without clobbering that write.
    pub fn set_document_if_unchanged_since(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Document,
        ttl: Option<Duration>,
        since: u64,
    ) -> Result<bool> {
        self.write(namespace, key, value, ttl, Some(since))
    }

    /// Version of the most recent write. Every later write gets a higher one.
    pub fn write_version(&self) -> u64 {
        self.write_version.load(Ordering::SeqCst)
    }

    fn write(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Document,
        ttl: Option<Duration>,
        since: Option<u64>,
    ) -> Result<bool> {
        validate_key(key)?;
        let mut shard = self.shard_mut(namespace)?;

        if let Some(since) = since {
            if shard.entries.get(key).is_some_and(|entry| entry.version > since) {
                debug!(namespace = %namespace, key, since, "Cache set skipped, entry written since");
                return Ok(false);
            }
        }

        let ttl = ttl.unwrap_or_else(|| shard.config.ttl());
        // Versions are taken under the shard lock so they order writes per key
        let version = self.write_version.fetch_add(1, Ordering::SeqCst) + 1;
        let evicted = shard.insert(key, value, ttl, Instant::now(), version);
        drop(shard);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(namespace = %namespace, key, ttl_ms = duration_ms(ttl), "Cache set");
        Ok(true)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&self, namespace: &Namespace, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.shard_mut(namespace)?.remove(key).is_some())
    }

    /// Remove every entry of a namespace whose key starts with `prefix`
    pub fn invalidate_prefix(&self, namespace: &Namespace, prefix: &str) -> Result<usize> {
        let count = self.shard_mut(namespace)?.remove_prefix(prefix);
        if count > 0 {
            debug!(namespace = %namespace, prefix, count, "Invalidated cache entries");
        }
        Ok(count)
    }

    /// Clear one namespace, or every namespace when `None`
    pub fn clear(&self, namespace: Option<&Namespace>) -> Result<()> {
        match namespace {
            Some(namespace) => {
                self.shard_mut(namespace)?.clear();
                info!(namespace = %namespace, "Cache namespace cleared");
            }
            None => {
                for mut shard in self.shards.iter_mut() {
                    shard.clear();
                }
                info!("Cache cleared");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Offline Mode & Maintenance
    // =========================================================================

    /// Serve expired entries instead of treating them as misses
    pub fn set_offline_mode(&self, offline: bool) {
        let previous = self.offline.swap(offline, Ordering::SeqCst);
        if previous != offline {
            info!(offline, "Cache offline mode changed");
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Remove expired entries from every namespace.
    ///
    /// Does nothing while offline mode is on, since stale entries are still
    /// being served.
    pub fn purge_expired(&self) -> usize {
        if self.is_offline() {
            return 0;
        }

        let now = Instant::now();
        let removed: usize = self
            .shards
            .iter_mut()
            .map(|mut shard| shard.purge_expired(now))
            .sum();

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(count = removed, "Purged expired cache entries");
        }
        removed
    }

    /// Number of entries in a namespace (expired entries not yet purged included)
    pub fn len(&self, namespace: &Namespace) -> Result<usize> {
        self.shards
            .get(namespace)
            .map(|shard| shard.entries.len())
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
    }

    /// Get cache statistics
    pub fn statistics(&self) -> CacheStatistics {
        let size_per_namespace = self
            .shards
            .iter()
            .map(|shard| (shard.key().clone(), shard.entries.len()))
            .collect();

        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size_per_namespace,
        }
    }

    /// Age of an entry, for diagnostics
    pub fn entry_age(&self, namespace: &Namespace, key: &str) -> Result<Option<Duration>> {
        validate_key(key)?;
        let shard = self
            .shards
            .get(namespace)
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))?;
        Ok(shard
            .entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed()))
    }

    fn shard_mut(
        &self,
        namespace: &Namespace,
    ) -> Result<dashmap::mapref::one::RefMut<'_, Namespace, Shard>> {
        self.shards
            .get_mut(namespace)
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".into()));
    }
    Ok(())
}
