//! Optimistic mutations
//!
//! Local writes are visible at once; remote writes are debounced per key and
//! rolled back in the cache if they fail.

pub mod coordinator;
pub mod state;

pub use coordinator::{remote_commit, OptimisticMutationCoordinator};
pub use state::{commit_fn, CommitFn, MutationEvent, MutationPhase};
