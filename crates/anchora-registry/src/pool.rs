//! Pooled document-source clients keyed by connection URI.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::source::{DocumentSource, SourceConnector, SourceResult};

/// Client pool keyed by URI.
///
/// Entries are probed on lookup; a failed probe evicts the entry and
/// reconnects once. The pool lock is held only around map access, never
/// across network calls.
pub struct ClientPool {
    connector: Arc<dyn SourceConnector>,
    max_pool_size: u32,
    clients: Mutex<HashMap<String, Arc<dyn DocumentSource>>>,
}

impl ClientPool {
    /// Create a pool over a connector with the per-URI pool bound.
    pub fn new(connector: Arc<dyn SourceConnector>, max_pool_size: u32) -> Self {
        Self {
            connector,
            max_pool_size,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live client for the URI, connecting if needed.
    pub async fn acquire(&self, uri: &str) -> SourceResult<Arc<dyn DocumentSource>> {
        let cached = self.clients.lock().await.get(uri).cloned();

        if let Some(client) = cached {
            match client.ping().await {
                Ok(()) => return Ok(client),
                Err(err) => {
                    warn!(error = %err, "pooled client failed liveness probe, reconnecting");
                    self.evict(uri).await;
                }
            }
        }

        let client = self.connector.connect(uri, self.max_pool_size).await?;
        client.ping().await?;
        self.clients
            .lock()
            .await
            .insert(uri.to_string(), client.clone());
        debug!("pooled new client");
        Ok(client)
    }

    /// Drop the pool entry for a URI.
    pub async fn evict(&self, uri: &str) {
        self.clients.lock().await.remove(uri);
    }

    /// Number of pooled entries.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
