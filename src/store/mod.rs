//! The outbound seam to the document service.
//!
//! `ConnectionManager` opens clients through a [`StoreConnector`]; everything above this module talks
//! to the store only through [`StoreClient`] and [`StoreDatabase`]. The in-memory service in
//! [`memory`] backs tests and embedded use, the `mongo` feature adds the real driver.

pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;

use crate::errors::StoreError;
use crate::query::FindOptions;
use crate::types::{Credential, Document, Role, ServerAddress};
use async_trait::async_trait;
use bson::Bson;
use std::sync::Arc;
use std::time::Duration;

/// Negotiation parameters for a single client.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// `None` opens an unauthenticated client.
    pub credential: Option<Credential>,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
    pub max_pool_size: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            credential: None,
            connect_timeout: Duration::from_secs(10),
            server_selection_timeout: Duration::from_secs(10),
            max_pool_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    pub capped: bool,
    pub max_documents: Option<u64>,
    pub max_bytes: Option<u64>,
}

impl CollectionOptions {
    #[must_use]
    pub const fn capped(max_documents: u64, max_bytes: u64) -> Self {
        Self { capped: true, max_documents: Some(max_documents), max_bytes: Some(max_bytes) }
    }
}

/// Replace the first document matching `filter`, inserting `replacement` when nothing matches.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOne {
    pub filter: Document,
    pub replacement: Document,
}

/// Outcome of a batched replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub acknowledged: bool,
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Builds a client handle. Implementations may defer all network traffic to first use.
    async fn open(
        &self,
        address: &ServerAddress,
        options: &OpenOptions,
    ) -> Result<Arc<dyn StoreClient>, StoreError>;
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Forces a round trip by reading at most one document from `database.collection`.
    async fn probe(&self, database: &str, collection: &str) -> Result<(), StoreError>;

    async fn principal_exists(&self, source: &str, username: &str) -> Result<bool, StoreError>;

    async fn create_principal(&self, credential: &Credential, roles: &[Role]) -> Result<(), StoreError>;

    async fn list_database_names(&self) -> Result<Vec<String>, StoreError>;

    /// Resolves a database handle. No I/O happens here.
    fn database(&self, name: &str) -> Arc<dyn StoreDatabase>;
}

#[async_trait]
pub trait StoreDatabase: Send + Sync {
    fn name(&self) -> &str;

    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError>;

    async fn create_collection(&self, name: &str, options: &CollectionOptions) -> Result<(), StoreError>;

    /// Dropping a collection that does not exist succeeds.
    async fn drop_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Appends documents, returning the identity of each in input order.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>, StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, StoreError>;

    /// Submits every operation as one batch, each as replace-with-upsert.
    async fn replace_many(&self, collection: &str, operations: Vec<ReplaceOne>) -> Result<WriteReport, StoreError>;

    /// Returns the number of documents removed.
    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, StoreError>;
}
