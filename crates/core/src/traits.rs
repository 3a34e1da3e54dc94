use crate::error::{SearchError, StorageError};
use crate::models::{BulkOutcome, IndexRecord, IndexStats, ObjectEntry, RawSearchResponse};
use async_trait::async_trait;
use serde_json::Value;

/// Read side of the remote object store holding the source documents.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError>;

    async fn read(&self, locator: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, locator: &str) -> Result<bool, StorageError>;

    /// Externally resolvable reference to the object, used in search results.
    fn public_url(&self, locator: &str) -> String;

    async fn health_check(&self) -> bool;
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn ensure_index(&self) -> Result<(), SearchError>;

    async fn bulk_index(&self, records: &[IndexRecord]) -> Result<BulkOutcome, SearchError>;

    /// Removes every document but keeps the index and its mapping.
    async fn clear(&self) -> Result<(), SearchError>;

    async fn refresh(&self) -> Result<(), SearchError>;

    async fn search(&self, body: &Value) -> Result<RawSearchResponse, SearchError>;

    /// Returns `false` when no document had that id.
    async fn delete_by_id(&self, id: &str) -> Result<bool, SearchError>;

    async fn index_stats(&self) -> Result<IndexStats, SearchError>;

    async fn health_check(&self) -> bool;
}
