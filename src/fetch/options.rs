//! Fetch request options and results

use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::cache::Namespace;
use crate::types::{Document, FetchError, Result};

/// How requested keys are matched against remote documents
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchQuery {
    /// Keys are document ids
    ByKey,
    /// Keys are values of `field`; each value resolves to an array of every
    /// document carrying it. Keys that parse as JSON numbers or booleans
    /// are matched as such, anything else as a string.
    ByField { field: String },
}

impl FetchQuery {
    /// Key under which a resolved document is cached
    pub fn cache_key(&self, key: &str) -> String {
        match self {
            Self::ByKey => key.to_string(),
            Self::ByField { field } => format!("{}={}", field, key),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::ByKey => "id".to_string(),
            Self::ByField { field } => format!("field:{}", field),
        }
    }
}

/// Options for [`BatchFetchCoordinator::fetch_many`](super::BatchFetchCoordinator::fetch_many)
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Remote collection to read from
    pub collection: String,
    /// Cache namespace results are stored in
    pub namespace: Namespace,
    /// Maximum keys per remote call; defaults to the coordinator config and
    /// may only lower it
    pub batch_limit: Option<usize>,
    pub query: FetchQuery,
    /// Serve stale offline entries immediately and refresh them in the background
    pub revalidate_stale: bool,
    /// TTL for cached results; defaults to the namespace TTL
    pub ttl: Option<Duration>,
}

impl FetchOptions {
    pub fn new(collection: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            collection: collection.into(),
            namespace,
            batch_limit: None,
            query: FetchQuery::ByKey,
            revalidate_stale: false,
            ttl: None,
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    /// Match keys against `field` instead of document ids
    pub fn by_field(mut self, field: impl Into<String>) -> Self {
        self.query = FetchQuery::ByField { field: field.into() };
        self
    }

    pub fn revalidate_stale(mut self) -> Self {
        self.revalidate_stale = true;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Requests with the same scope may share in-flight chunks
    pub(crate) fn scope(&self) -> String {
        format!("{}|{}|{}", self.namespace, self.collection, self.query.describe())
    }
}

/// Merged result of a batch fetch.
///
/// Every requested key lands in exactly one of `resolved`, `failed` or
/// `missing`.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Keys served from cache, joined fetches or this call's own chunks
    pub resolved: HashMap<String, Document>,
    /// Keys whose chunk failed, with the chunk's error
    pub failed: HashMap<String, FetchError>,
    /// Keys the remote store has no document for
    pub missing: HashSet<String>,
    /// Subset of `resolved` served stale from cache (offline mode)
    pub stale: HashSet<String>,
}

impl FetchOutcome {
    /// True when no chunk failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Typed copy of a resolved document
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.resolved.get(key) {
            Some(doc) => Ok(Some(serde_json::from_value(doc.clone())?)),
            None => Ok(None),
        }
    }

    /// Total number of keys accounted for
    pub fn len(&self) -> usize {
        self.resolved.len() + self.failed.len() + self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
