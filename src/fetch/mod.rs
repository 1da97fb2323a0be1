//! Batched remote reads
//!
//! [`BatchFetchCoordinator`] serves keys from the cache, joins fetches that
//! are already in flight, and splits the remainder into chunks no larger than
//! the remote store's batch limit.

pub mod coordinator;
pub mod options;
mod registry;

pub use coordinator::BatchFetchCoordinator;
pub use options::{FetchOptions, FetchOutcome, FetchQuery};
