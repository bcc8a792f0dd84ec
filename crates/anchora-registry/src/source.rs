//! The seam to the MongoDB driver.
//!
//! Documents are opaque after read: the platform moves them around as
//! relaxed extended-JSON values and never inspects fields.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by a document source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Result type alias for source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Cursor parameters for a find over one collection.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Filter document; empty means match-all.
    pub filter: Value,
    /// Sort specification, e.g. `{"_id": 1}`.
    pub sort: Option<Value>,
    /// Documents to skip.
    pub skip: Option<u64>,
    /// Maximum documents to return.
    pub limit: Option<u64>,
}

impl FindQuery {
    /// A match-all query ordered by `_id`, used for backup paging.
    pub fn id_ordered_page(skip: u64, limit: u64) -> Self {
        Self {
            filter: Value::Object(Default::default()),
            sort: Some(serde_json::json!({ "_id": 1 })),
            skip: Some(skip),
            limit: Some(limit),
        }
    }
}

/// A live client against one MongoDB deployment.
#[async_trait]
pub trait DocumentSource: Send + Sync + std::fmt::Debug {
    /// Liveness probe.
    async fn ping(&self) -> SourceResult<()>;

    /// Names of all databases visible to the connection.
    async fn list_databases(&self) -> SourceResult<Vec<String>>;

    /// Collection names within a database, unfiltered.
    async fn list_collections(&self, database: &str) -> SourceResult<Vec<String>>;

    /// Exact document count for a collection.
    async fn count_documents(&self, database: &str, collection: &str) -> SourceResult<u64>;

    /// Run a find and drain the cursor into extended-JSON documents.
    async fn find_documents(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> SourceResult<Vec<Value>>;

    /// Run an aggregation pipeline and drain its cursor.
    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> SourceResult<Vec<Value>>;
}

/// Factory turning a connection URI into a live source.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Establish a client for the URI with the given per-URI pool bound.
    async fn connect(
        &self,
        uri: &str,
        max_pool_size: u32,
    ) -> SourceResult<Arc<dyn DocumentSource>>;
}
