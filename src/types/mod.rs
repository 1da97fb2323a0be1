//! Shared types

pub mod error;

pub use error::{CacheError, CommitError, FetchError, RemoteError, Result};

/// Opaque document payload exchanged with the remote store.
pub type Document = serde_json::Value;

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
