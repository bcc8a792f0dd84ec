//! # Anchora MongoDB Adapter
//!
//! Driver-backed implementation of the registry's `DocumentSource` and
//! `SourceConnector` seams using the official `mongodb` crate.
//!
//! Documents are rendered to relaxed extended JSON as they leave the cursor;
//! nothing downstream inspects their fields.

#![warn(clippy::all)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value;
use tracing::debug;

use anchora_registry::{DocumentSource, FindQuery, SourceConnector, SourceError, SourceResult};

/// Server-selection bound; a cold deployment fails fast instead of hanging.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP connect bound.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A live client for one MongoDB deployment.
#[derive(Debug)]
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    /// Establish a client for the URI.
    pub async fn connect(uri: &str, max_pool_size: u32) -> SourceResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        options.max_pool_size = Some(max_pool_size);
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.connect_timeout = Some(CONNECT_TIMEOUT);

        let client =
            Client::with_options(options).map_err(|e| SourceError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn ping(&self) -> SourceResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_driver_error)?;
        Ok(())
    }

    async fn list_databases(&self) -> SourceResult<Vec<String>> {
        self.client
            .list_database_names()
            .await
            .map_err(map_driver_error)
    }

    async fn list_collections(&self, database: &str) -> SourceResult<Vec<String>> {
        self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(map_driver_error)
    }

    async fn count_documents(&self, database: &str, collection: &str) -> SourceResult<u64> {
        self.client
            .database(database)
            .collection::<Document>(collection)
            .count_documents(doc! {})
            .await
            .map_err(map_driver_error)
    }

    async fn find_documents(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> SourceResult<Vec<Value>> {
        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection);

        let mut find = coll.find(to_filter_document(&query.filter)?);
        if let Some(sort) = &query.sort {
            find = find.sort(to_filter_document(sort)?);
        }
        if let Some(skip) = query.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }

        let mut cursor = find.await.map_err(map_driver_error)?;
        let mut documents = Vec::new();
        while let Some(document) = cursor.try_next().await.map_err(map_driver_error)? {
            documents.push(Bson::Document(document).into_relaxed_extjson());
        }
        debug!(database, collection, count = documents.len(), "find drained");
        Ok(documents)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> SourceResult<Vec<Value>> {
        let stages: Vec<Document> = pipeline
            .iter()
            .map(to_filter_document)
            .collect::<SourceResult<_>>()?;

        let mut cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .aggregate(stages)
            .await
            .map_err(map_driver_error)?;

        let mut documents = Vec::new();
        while let Some(document) = cursor.try_next().await.map_err(map_driver_error)? {
            documents.push(Bson::Document(document).into_relaxed_extjson());
        }
        Ok(documents)
    }
}

/// Connector handing out [`MongoSource`] clients.
#[derive(Default)]
pub struct MongoConnector;

impl MongoConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceConnector for MongoConnector {
    async fn connect(
        &self,
        uri: &str,
        max_pool_size: u32,
    ) -> SourceResult<Arc<dyn DocumentSource>> {
        let source = MongoSource::connect(uri, max_pool_size).await?;
        Ok(Arc::new(source))
    }
}

/// Convert a JSON filter/sort/stage value into a BSON document.
///
/// `Null` and absent filters collapse to a match-all document.
fn to_filter_document(value: &Value) -> SourceResult<Document> {
    match value {
        Value::Null => Ok(doc! {}),
        Value::Object(_) => mongodb::bson::to_document(value)
            .map_err(|e| SourceError::Query(format!("Invalid query document: {}", e))),
        other => Err(SourceError::Query(format!(
            "Query must be a JSON object, got {}",
            other
        ))),
    }
}

fn map_driver_error(err: mongodb::error::Error) -> SourceError {
    use mongodb::error::ErrorKind;
    match *err.kind {
        ErrorKind::ServerSelection { .. } => SourceError::Timeout(err.to_string()),
        ErrorKind::Io(_) => SourceError::Unreachable(err.to_string()),
        _ => SourceError::Query(err.to_string()),
    }
}
