//! In-flight chunk registry
//!
//! Maps chunk signatures to the shared future resolving them, plus a reverse
//! index from each key to the chunk currently fetching it. Concurrent callers
//! asking for a key that is already on its way join that chunk instead of
//! issuing a duplicate remote call.

use futures::future::{BoxFuture, Shared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::types::{Document, FetchError};

/// Result of one chunk, shared by every waiter
pub(crate) type ChunkResult = Arc<Result<HashMap<String, Document>, FetchError>>;

/// Future resolving a chunk; clones can be awaited independently
pub(crate) type SharedChunk = Shared<BoxFuture<'static, ChunkResult>>;

struct InFlightChunk {
    scope: String,
    keys: Vec<String>,
    future: SharedChunk,
    abort: AbortHandle,
}

#[derive(Default)]
pub(crate) struct InFlightRegistry {
    chunks: HashMap<String, InFlightChunk>,
    /// (scope, key) -> signature of the chunk fetching it
    by_key: HashMap<(String, String), String>,
}

impl InFlightRegistry {
    /// Find the in-flight chunk already fetching `key`
    pub(crate) fn lookup(&self, scope: &str, key: &str) -> Option<(String, SharedChunk)> {
        let signature = self.by_key.get(&(scope.to_string(), key.to_string()))?;
        let chunk = self.chunks.get(signature)?;
        Some((signature.clone(), chunk.future.clone()))
    }

    pub(crate) fn register(
        &mut self,
        signature: String,
        scope: &str,
        keys: Vec<String>,
        future: SharedChunk,
        abort: AbortHandle,
    ) {
        for key in &keys {
            self.by_key
                .insert((scope.to_string(), key.clone()), signature.clone());
        }
        self.chunks.insert(
            signature,
            InFlightChunk {
                scope: scope.to_string(),
                keys,
                future,
                abort,
            },
        );
    }

    /// Remove a resolved chunk. Keys re-registered by a newer chunk keep
    /// pointing at it.
    pub(crate) fn complete(&mut self, signature: &str) {
        let Some(chunk) = self.chunks.remove(signature) else {
            return;
        };
        for key in chunk.keys {
            let index_key = (chunk.scope.clone(), key);
            if self.by_key.get(&index_key).map(String::as_str) == Some(signature) {
                self.by_key.remove(&index_key);
            }
        }
    }

    /// Cancel every in-flight chunk. Returns how many were aborted.
    pub(crate) fn abort_all(&mut self) -> usize {
        let count = self.chunks.len();
        for chunk in self.chunks.values() {
            chunk.abort.abort();
        }
        self.chunks.clear();
        self.by_key.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Canonical signature of a chunk: hash of its scope and sorted key set
pub(crate) fn chunk_signature(scope: &str, keys: &[String]) -> String {
    let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    for key in sorted {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}
