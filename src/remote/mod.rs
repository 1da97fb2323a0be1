//! Remote document store boundary
//!
//! The only network/storage boundary of the crate. The embedding application
//! supplies the transport; the coordinators only ever see this trait.
//!
//! Callers guarantee that `keys` / `values` never exceed the store's own
//! batch limit. The [`BatchFetchCoordinator`](crate::fetch::BatchFetchCoordinator)
//! chunks requests so that this always holds.

pub mod memory;

pub use memory::{InMemoryRemoteStore, RemoteCall};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{Document, RemoteError};

/// Acknowledgement of a single-document write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Document id that was written
    pub id: String,
}

/// Trait for the remote document store (allows mocking in tests)
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch documents by id. Ids with no document are absent from the map.
    async fn fetch_by_keys(
        &self,
        collection: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Document>, RemoteError>;

    /// Fetch documents whose `field` equals one of `values`
    async fn fetch_by_field(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>, RemoteError>;

    /// Write a single document
    async fn write_field(
        &self,
        collection: &str,
        id: &str,
        data: &Document,
    ) -> Result<Ack, RemoteError>;
}
