//! In-memory document source for tests and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::source::{DocumentSource, FindQuery, SourceConnector, SourceError, SourceResult};

/// Failure injection for one collection.
#[derive(Debug, Clone, Copy)]
struct CollectionFault {
    /// Error once the cursor has advanced past this many documents.
    after_docs: u64,
}

#[derive(Default, Debug)]
struct MemoryData {
    /// database -> collection -> documents
    databases: HashMap<String, HashMap<String, Vec<Value>>>,
    /// (database, collection) -> injected fault
    faults: HashMap<(String, String), CollectionFault>,
}

/// In-memory [`DocumentSource`] with failure injection.
#[derive(Default, Debug)]
pub struct MemorySource {
    data: Mutex<MemoryData>,
    fail_ping: AtomicBool,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert documents into a collection, creating it as needed.
    pub fn insert_documents(&self, database: &str, collection: &str, documents: Vec<Value>) {
        let mut data = self.data.lock().unwrap();
        data.databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Create an empty collection.
    pub fn create_collection(&self, database: &str, collection: &str) {
        let mut data = self.data.lock().unwrap();
        data.databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
    }

    /// Make reads of a collection fail once `after_docs` documents have been
    /// served; zero fails the very first read.
    pub fn fail_collection_after(&self, database: &str, collection: &str, after_docs: u64) {
        let mut data = self.data.lock().unwrap();
        data.faults.insert(
            (database.to_string(), collection.to_string()),
            CollectionFault { after_docs },
        );
    }

    /// Toggle ping failure.
    pub fn set_ping_failure(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn ping(&self) -> SourceResult<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            Err(SourceError::Unreachable("ping failed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn list_databases(&self) -> SourceResult<Vec<String>> {
        let data = self.data.lock().unwrap();
        let mut names: Vec<String> = data.databases.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_collections(&self, database: &str) -> SourceResult<Vec<String>> {
        let data = self.data.lock().unwrap();
        let mut names: Vec<String> = data
            .databases
            .get(database)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn count_documents(&self, database: &str, collection: &str) -> SourceResult<u64> {
        let data = self.data.lock().unwrap();
        Ok(data
            .databases
            .get(database)
            .and_then(|colls| colls.get(collection))
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn find_documents(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> SourceResult<Vec<Value>> {
        let data = self.data.lock().unwrap();

        let skip = query.skip.unwrap_or(0);
        if let Some(fault) = data
            .faults
            .get(&(database.to_string(), collection.to_string()))
        {
            if skip >= fault.after_docs {
                return Err(SourceError::Query("cursor interrupted".to_string()));
            }
        }

        let docs = data
            .databases
            .get(database)
            .and_then(|colls| colls.get(collection))
            .cloned()
            .unwrap_or_default();

        let mut matched: Vec<Value> = docs
            .into_iter()
            .filter(|doc| matches_filter(doc, &query.filter))
            .collect();

        if query.sort.is_some() {
            matched.sort_by_key(|doc| doc.get("_id").map(value_sort_key).unwrap_or_default());
        }

        let iter = matched.into_iter().skip(skip as usize);
        let page: Vec<Value> = match query.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        };

        // Honor the fault mid-stream: error instead of serving past it.
        if let Some(fault) = data
            .faults
            .get(&(database.to_string(), collection.to_string()))
        {
            if skip + page.len() as u64 > fault.after_docs {
                return Err(SourceError::Query("cursor interrupted".to_string()));
            }
        }

        Ok(page)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> SourceResult<Vec<Value>> {
        if !pipeline.is_empty() {
            return Err(SourceError::Query(
                "memory source supports only empty pipelines".to_string(),
            ));
        }
        self.find_documents(database, collection, &FindQuery::default())
            .await
    }
}

/// Top-level equality match; an empty filter matches everything.
fn matches_filter(doc: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        None => true,
        Some(fields) => fields
            .iter()
            .all(|(key, expected)| doc.get(key) == Some(expected)),
    }
}

/// Sort key for `_id` values of heterogeneous JSON types.
fn value_sort_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Connector over a fixed set of registered URIs.
#[derive(Default)]
pub struct MemoryConnector {
    sources: tokio::sync::Mutex<HashMap<String, Arc<MemorySource>>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    /// Create an empty connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the source behind a URI.
    pub async fn register(&self, uri: &str) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        self.sources
            .lock()
            .await
            .insert(uri.to_string(), source.clone());
        source
    }

    /// How many connects have been served.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn connect(
        &self,
        uri: &str,
        _max_pool_size: u32,
    ) -> SourceResult<Arc<dyn DocumentSource>> {
        let sources = self.sources.lock().await;
        match sources.get(uri) {
            Some(source) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(source.clone() as Arc<dyn DocumentSource>)
            }
            None => Err(SourceError::Unreachable(format!(
                "no deployment behind {}",
                uri
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_id_ordered_paging() {
        let source = MemorySource::new();
        source.insert_documents(
            "app",
            "events",
            vec![
                json!({"_id": "c", "n": 3}),
                json!({"_id": "a", "n": 1}),
                json!({"_id": "b", "n": 2}),
            ],
        );

        let page = source
            .find_documents("app", "events", &FindQuery::id_ordered_page(0, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["_id"], "a");
        assert_eq!(page[1]["_id"], "b");

        let rest = source
            .find_documents("app", "events", &FindQuery::id_ordered_page(2, 2))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["_id"], "c");
    }

    #[tokio::test]
    async fn test_equality_filter() {
        let source = MemorySource::new();
        source.insert_documents(
            "app",
            "events",
            vec![json!({"_id": 1, "kind": "x"}), json!({"_id": 2, "kind": "y"})],
        );

        let query = FindQuery {
            filter: json!({"kind": "y"}),
            ..Default::default()
        };
        let found = source.find_documents("app", "events", &query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], 2);
    }

    #[tokio::test]
    async fn test_fault_injection_interrupts_cursor() {
        let source = MemorySource::new();
        source.insert_documents(
            "app",
            "broken",
            vec![json!({"_id": 1}), json!({"_id": 2}), json!({"_id": 3})],
        );
        source.fail_collection_after("app", "broken", 2);

        let first = source
            .find_documents("app", "broken", &FindQuery::id_ordered_page(0, 2))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        assert!(source
            .find_documents("app", "broken", &FindQuery::id_ordered_page(2, 2))
            .await
            .is_err());
    }
}
