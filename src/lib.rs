//! Docstore Cache Core - cache, batch fetch and optimistic mutation layer
//!
//! Sits between an application's UI and a remote document store that
//! offers key-based reads, field-filtered reads and per-document writes.
//!
//! ## Components
//!
//! - **Cache**: namespaced key/value store with per-namespace TTL and LRU capacity
//! - **Fetch**: batched reads that reuse cached and in-flight results
//! - **Mutation**: local-first writes with debounced commits and rollback
//! - **Remote**: the [`RemoteStore`] trait plus an in-memory implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = Arc::new(CacheStore::with_defaults());
//! let remote: Arc<dyn RemoteStore> = Arc::new(my_remote);
//!
//! let fetcher = BatchFetchCoordinator::with_defaults(store.clone(), remote.clone())?;
//! let outcome = fetcher
//!     .fetch_many(["s1", "s2"], &FetchOptions::new("stations", Namespace::Static))
//!     .await?;
//!
//! let mutations = OptimisticMutationCoordinator::with_defaults(store, Namespace::Volatile)?;
//! mutations.mutate("fav:s1", &true, remote_commit(remote, "favorites"))?;
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod mutation;
pub mod remote;
pub mod types;

pub use cache::{spawn_sweeper, CacheStatistics, CacheStore, Lookup, Namespace, SweepHandle};
pub use config::{CacheConfig, FetchConfig, MutationConfig, NamespaceConfig};
pub use fetch::{BatchFetchCoordinator, FetchOptions, FetchOutcome, FetchQuery};
pub use mutation::{
    commit_fn, remote_commit, CommitFn, MutationEvent, MutationPhase, OptimisticMutationCoordinator,
};
pub use remote::{Ack, InMemoryRemoteStore, RemoteCall, RemoteStore};
pub use types::{CacheError, CommitError, Document, FetchError, RemoteError, Result};
