//! Caching layer
//!
//! One [`CacheStore`] holds every cached document, partitioned into
//! [`Namespace`]s that each carry their own TTL and capacity. Both
//! coordinators read and write through it; nothing else owns entries.
//!
//! ## Expiry
//!
//! - Lazy: an expired entry is dropped when it is read
//! - Swept: [`spawn_sweeper`] purges entries nobody reads again
//! - Offline mode: expired entries are served and flagged stale instead

pub mod namespace;
pub mod store;
pub mod sweep;

pub use namespace::Namespace;
pub use store::{CacheStatistics, CacheStore, Lookup};
pub use sweep::{spawn_sweeper, SweepHandle};
