//! Configuration for the cache core
//!
//! Every component takes a plain config struct with sensible defaults.
//! Embedding applications can override defaults from the environment with
//! `from_env()` or deserialize the structs from their own config files.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::Namespace;
use crate::types::{CacheError, Result};

// =============================================================================
// Cache Store Configuration
// =============================================================================

/// Per-namespace limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Default TTL for entries in milliseconds
    pub ttl_ms: u64,
    /// Maximum number of entries
    pub capacity: usize,
}

impl NamespaceConfig {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl_ms: duration_ms(ttl),
            capacity,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self, namespace: &Namespace) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(format!(
                "namespace {} must have a capacity of at least 1",
                namespace
            )));
        }
        if self.ttl_ms == 0 {
            return Err(CacheError::InvalidConfig(format!(
                "namespace {} must have a non-zero TTL",
                namespace
            )));
        }
        Ok(())
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespaces registered at construction
    pub namespaces: Vec<(Namespace, NamespaceConfig)>,
    /// Interval between background TTL sweeps in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespaces: vec![
                (
                    Namespace::Static,
                    NamespaceConfig::new(Duration::from_secs(3600), 1000), // 1 hour
                ),
                (
                    Namespace::Volatile,
                    NamespaceConfig::new(Duration::from_secs(300), 500), // 5 minutes
                ),
            ],
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        let static_ttl_secs = env_or("CACHE_STATIC_TTL_SECS", 3600u64);
        let static_capacity = env_or("CACHE_STATIC_CAPACITY", 1000usize);
        let volatile_ttl_secs = env_or("CACHE_VOLATILE_TTL_SECS", 300u64);
        let volatile_capacity = env_or("CACHE_VOLATILE_CAPACITY", 500usize);
        let sweep_secs = env_or("CACHE_SWEEP_INTERVAL_SECS", 60u64);

        Self {
            namespaces: vec![
                (
                    Namespace::Static,
                    NamespaceConfig::new(Duration::from_secs(static_ttl_secs), static_capacity),
                ),
                (
                    Namespace::Volatile,
                    NamespaceConfig::new(Duration::from_secs(volatile_ttl_secs), volatile_capacity),
                ),
            ],
            sweep_interval_ms: sweep_secs * 1000,
        }
    }

    /// Config with no namespaces; register them with [`CacheConfig::with_namespace`].
    pub fn empty() -> Self {
        Self {
            namespaces: Vec::new(),
            sweep_interval_ms: 60_000,
        }
    }

    /// Add or replace a namespace
    pub fn with_namespace(mut self, namespace: Namespace, config: NamespaceConfig) -> Self {
        self.namespaces.retain(|(ns, _)| *ns != namespace);
        self.namespaces.push((namespace, config));
        self
    }

    /// Look up the limits of a namespace
    pub fn namespace(&self, namespace: &Namespace) -> Option<&NamespaceConfig> {
        self.namespaces
            .iter()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, config)| config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        for (namespace, config) in &self.namespaces {
            config.validate(namespace)?;
        }
        if self.sweep_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "sweep interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Batch Fetch Configuration
// =============================================================================

/// Batch fetch coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum keys per remote call, imposed by the remote store
    pub batch_limit: usize,
    /// Maximum chunks dispatched concurrently
    pub max_parallel_chunks: usize,
    /// Timeout for each remote call in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_limit: 10,
            max_parallel_chunks: 4,
            request_timeout_ms: 15_000,
        }
    }
}

impl FetchConfig {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        Self {
            batch_limit: env_or("FETCH_BATCH_LIMIT", 10usize),
            max_parallel_chunks: env_or("FETCH_MAX_PARALLEL_CHUNKS", 4usize),
            request_timeout_ms: env_or("FETCH_TIMEOUT_MS", 15_000u64),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_limit == 0 {
            return Err(CacheError::InvalidConfig("batch limit must be at least 1".into()));
        }
        if self.max_parallel_chunks == 0 {
            return Err(CacheError::InvalidConfig(
                "max parallel chunks must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(CacheError::InvalidConfig("request timeout must be non-zero".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Mutation Configuration
// =============================================================================

/// Optimistic mutation coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Quiet period before a pending mutation is committed, in milliseconds
    pub debounce_ms: u64,
    /// Timeout for each remote write in milliseconds
    pub commit_timeout_ms: u64,
    /// Complete a cycle without writing when the value ends where it started
    pub skip_noop_commits: bool,
    /// Buffered events per listener before old events are dropped
    pub event_capacity: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            commit_timeout_ms: 15_000,
            skip_noop_commits: true,
            event_capacity: 64,
        }
    }
}

impl MutationConfig {
    /// Config optimized for toggles driven directly by the UI
    pub fn for_interactive() -> Self {
        Self {
            debounce_ms: 300,
            commit_timeout_ms: 10_000,
            ..Self::default()
        }
    }

    /// Config optimized for background edits where latency matters less
    pub fn for_bulk() -> Self {
        Self {
            debounce_ms: 2_000,
            commit_timeout_ms: 30_000,
            ..Self::default()
        }
    }

    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        Self {
            debounce_ms: env_or("MUTATION_DEBOUNCE_MS", 500u64),
            commit_timeout_ms: env_or("MUTATION_TIMEOUT_MS", 15_000u64),
            ..Self::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.commit_timeout_ms == 0 {
            return Err(CacheError::InvalidConfig("commit timeout must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(CacheError::InvalidConfig("event capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(
            config.namespace(&Namespace::Static).map(|c| c.ttl()),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            config.namespace(&Namespace::Volatile).map(|c| c.capacity),
            Some(500)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_namespace_replaces_existing() {
        let config = CacheConfig::default()
            .with_namespace(Namespace::Volatile, NamespaceConfig::new(Duration::from_secs(1), 3))
            .with_namespace(Namespace::custom("favorites"), NamespaceConfig::new(Duration::from_secs(10), 50));

        assert_eq!(config.namespaces.len(), 3);
        assert_eq!(config.namespace(&Namespace::Volatile).unwrap().capacity, 3);
        assert!(config.namespace(&Namespace::custom("favorites")).is_some());
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let config = NamespaceConfig::new(Duration::MAX, 10);
        assert_eq!(config.ttl_ms, u64::MAX);
        assert!(config.validate(&Namespace::Static).is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig::empty()
            .with_namespace(Namespace::Static, NamespaceConfig::new(Duration::from_secs(1), 0));
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_fetch_config_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.max_parallel_chunks, 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));

        let broken = FetchConfig { batch_limit: 0, ..FetchConfig::default() };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_mutation_config_presets() {
        assert_eq!(MutationConfig::default().debounce(), Duration::from_millis(500));
        assert_eq!(MutationConfig::for_interactive().debounce_ms, 300);
        assert_eq!(MutationConfig::for_bulk().commit_timeout_ms, 30_000);

        let broken = MutationConfig { event_capacity: 0, ..MutationConfig::default() };
        assert!(broken.validate().is_err());
    }
}
