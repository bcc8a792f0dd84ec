//! Connection descriptors and access-checked resolution.

use std::collections::HashMap;
use std::sync::Arc;

use anchora_tenant::TenancyStore;
use anchora_vault::CredentialVault;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};
use crate::pool::ClientPool;
use crate::source::{DocumentSource, FindQuery, SourceConnector};

/// Saved MongoDB connection descriptor.
///
/// The connection string is encrypted by the vault before it ever reaches
/// this record; plaintext URIs exist only in transit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection ID
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Display name shown in listings and backup paths
    pub display_name: String,
    /// Encrypted connection string
    #[serde(skip_serializing)]
    pub encrypted_connection_string: String,
    /// Admin who saved the connection
    pub created_by: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Collection listing entry; `count` is `None` when counts were not requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub count: Option<u64>,
}

/// A descriptor resolved into a live client.
#[derive(Debug)]
pub struct ResolvedConnection {
    pub connection: Connection,
    pub source: Arc<dyn DocumentSource>,
}

/// Registry of saved connections, scoped per organization.
pub struct ConnectionRegistry {
    vault: Arc<CredentialVault>,
    tenancy: Arc<TenancyStore>,
    pool: ClientPool,
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    /// Create a registry resolving through the given connector.
    pub fn new(
        vault: Arc<CredentialVault>,
        tenancy: Arc<TenancyStore>,
        connector: Arc<dyn SourceConnector>,
        mongo_pool_size: u32,
    ) -> Self {
        Self {
            vault,
            tenancy,
            pool: ClientPool::new(connector, mongo_pool_size),
            connections: RwLock::new(HashMap::new()),
        }
    }

    // ---- descriptor CRUD ----

    /// Save a connection. Admin-only; the URI is encrypted at rest.
    pub async fn create_connection(
        &self,
        admin_id: &str,
        org_id: &str,
        display_name: &str,
        connection_string: &str,
    ) -> RegistryResult<Connection> {
        self.tenancy.require_admin(admin_id, org_id).await?;
        validate_descriptor(display_name, connection_string)?;

        let encrypted = self
            .vault
            .encrypt(connection_string)
            .map_err(|_| RegistryError::Validation("Connection string rejected".to_string()))?;

        let connection = Connection {
            id: Uuid::new_v4().to_string(),
            organization_id: org_id.to_string(),
            display_name: display_name.trim().to_string(),
            encrypted_connection_string: encrypted,
            created_by: admin_id.to_string(),
            created_at: Utc::now(),
        };

        self.connections
            .write()
            .await
            .insert(connection.id.clone(), connection.clone());
        info!(org_id = %org_id, connection_id = %connection.id, "connection saved");
        Ok(connection)
    }

    /// Update a connection's display name and/or URI. Admin-only.
    pub async fn update_connection(
        &self,
        admin_id: &str,
        org_id: &str,
        connection_id: &str,
        display_name: Option<&str>,
        connection_string: Option<&str>,
    ) -> RegistryResult<()> {
        self.tenancy.require_admin(admin_id, org_id).await?;

        let encrypted = match connection_string {
            Some(uri) => {
                validate_descriptor(display_name.unwrap_or("connection"), uri)?;
                Some(self.vault.encrypt(uri).map_err(|_| {
                    RegistryError::Validation("Connection string rejected".to_string())
                })?)
            }
            None => None,
        };

        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(connection_id)
            .filter(|c| c.organization_id == org_id)
            .ok_or(RegistryError::ConnectionNotFound)?;

        if let Some(name) = display_name {
            if name.trim().is_empty() {
                return Err(RegistryError::Validation(
                    "Display name must not be empty".to_string(),
                ));
            }
            connection.display_name = name.trim().to_string();
        }
        if let Some(encrypted) = encrypted {
            connection.encrypted_connection_string = encrypted;
        }
        Ok(())
    }

    /// Delete a connection and its grants. Admin-only.
    pub async fn delete_connection(
        &self,
        admin_id: &str,
        org_id: &str,
        connection_id: &str,
    ) -> RegistryResult<()> {
        self.tenancy.require_admin(admin_id, org_id).await?;

        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(connection_id) {
                Some(c) if c.organization_id == org_id => connections.remove(connection_id),
                _ => None,
            }
        };
        if removed.is_none() {
            return Err(RegistryError::ConnectionNotFound);
        }

        self.tenancy.purge_connection_grants(connection_id).await;
        info!(org_id = %org_id, connection_id = %connection_id, "connection deleted");
        Ok(())
    }

    /// List connections visible to the caller: all of them for admins,
    /// granted ones for members.
    pub async fn list_connections(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> RegistryResult<Vec<Connection>> {
        self.tenancy.require_member(user_id, org_id).await?;

        let connections = self.connections.read().await;
        let mut visible = Vec::new();
        for connection in connections.values() {
            if connection.organization_id != org_id {
                continue;
            }
            if self
                .tenancy
                .can_access_connection(user_id, &connection.id, org_id)
                .await
            {
                visible.push(connection.clone());
            }
        }
        visible.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(visible)
    }

    /// Load a descriptor without an access check. Internal API for sibling
    /// services that run their own predicate first.
    pub async fn connection(&self, connection_id: &str) -> Option<Connection> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Drop every connection owned by an organization, returning their ids.
    pub async fn purge_organization(&self, org_id: &str) -> Vec<String> {
        let mut connections = self.connections.write().await;
        let doomed: Vec<String> = connections
            .values()
            .filter(|c| c.organization_id == org_id)
            .map(|c| c.id.clone())
            .collect();
        for id in &doomed {
            connections.remove(id);
        }
        doomed
    }

    // ---- resolution ----

    /// Resolve a connection into a live client.
    ///
    /// Runs the access predicate, rejects descriptors outside the caller's
    /// organization, decrypts the URI, and hands out a pooled client probed
    /// for liveness.
    pub async fn resolve(
        &self,
        user_id: &str,
        org_id: &str,
        connection_id: &str,
    ) -> RegistryResult<ResolvedConnection> {
        self.tenancy
            .require_connection_access(user_id, connection_id, org_id)
            .await?;

        let connection = self
            .connection(connection_id)
            .await
            .filter(|c| c.organization_id == org_id)
            .ok_or(RegistryError::ConnectionNotFound)?;

        let uri = self
            .vault
            .decrypt(&connection.encrypted_connection_string)
            .map_err(|_| RegistryError::DecryptionFailed)?;

        let source = self.pool.acquire(&uri).await?;
        debug!(connection_id = %connection_id, "connection resolved");
        Ok(ResolvedConnection { connection, source })
    }

    // ---- browse helpers ----

    /// Databases visible through a connection.
    pub async fn list_databases(
        &self,
        user_id: &str,
        org_id: &str,
        connection_id: &str,
    ) -> RegistryResult<Vec<String>> {
        let resolved = self.resolve(user_id, org_id, connection_id).await?;
        Ok(resolved.source.list_databases().await?)
    }

    /// Collections in a database, with exact counts when requested.
    pub async fn list_collections(
        &self,
        user_id: &str,
        org_id: &str,
        connection_id: &str,
        database: &str,
        include_counts: bool,
    ) -> RegistryResult<Vec<CollectionInfo>> {
        let resolved = self.resolve(user_id, org_id, connection_id).await?;
        let names = resolved.source.list_collections(database).await?;

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            let count = if include_counts {
                Some(resolved.source.count_documents(database, &name).await?)
            } else {
                None
            };
            collections.push(CollectionInfo { name, count });
        }
        Ok(collections)
    }

    /// Query documents through a connection.
    pub async fn get_documents(
        &self,
        user_id: &str,
        org_id: &str,
        connection_id: &str,
        database: &str,
        collection: &str,
        query: FindQuery,
    ) -> RegistryResult<Vec<Value>> {
        let resolved = self.resolve(user_id, org_id, connection_id).await?;
        Ok(resolved
            .source
            .find_documents(database, collection, &query)
            .await?)
    }

    /// Run an aggregation pipeline through a connection.
    pub async fn run_aggregate(
        &self,
        user_id: &str,
        org_id: &str,
        connection_id: &str,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> RegistryResult<Vec<Value>> {
        let resolved = self.resolve(user_id, org_id, connection_id).await?;
        Ok(resolved
            .source
            .aggregate(database, collection, pipeline)
            .await?)
    }
}

fn validate_descriptor(display_name: &str, connection_string: &str) -> RegistryResult<()> {
    if display_name.trim().is_empty() {
        return Err(RegistryError::Validation(
            "Display name must not be empty".to_string(),
        ));
    }
    if !connection_string.starts_with("mongodb://")
        && !connection_string.starts_with("mongodb+srv://")
    {
        return Err(RegistryError::Validation(
            "Connection string must be a mongodb:// or mongodb+srv:// URI".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use serde_json::json;

    struct Fixture {
        registry: ConnectionRegistry,
        tenancy: Arc<TenancyStore>,
        connector: Arc<MemoryConnector>,
        org_id: String,
    }

    async fn fixture() -> Fixture {
        let vault = Arc::new(CredentialVault::new("test-master-key").unwrap());
        let tenancy = Arc::new(TenancyStore::new(vault.clone()));
        let org_id = tenancy
            .create_organization("admin-1", "Acme", "backup-pw")
            .await
            .unwrap();
        let connector = Arc::new(MemoryConnector::new());
        let registry =
            ConnectionRegistry::new(vault, tenancy.clone(), connector.clone(), 10);
        Fixture {
            registry,
            tenancy,
            connector,
            org_id,
        }
    }

    async fn join_as_member(fx: &Fixture, user_id: &str, email: &str) {
        let invitation = fx
            .tenancy
            .invite("admin-1", &fx.org_id, email)
            .await
            .unwrap();
        fx.tenancy
            .accept_invitation(user_id, email, true, &invitation.token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_encrypts_uri_at_rest() {
        let fx = fixture().await;
        let connection = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "prod", "mongodb://db.local:27017")
            .await
            .unwrap();

        assert_ne!(
            connection.encrypted_connection_string,
            "mongodb://db.local:27017"
        );
        assert!(!connection
            .encrypted_connection_string
            .contains("db.local"));
    }

    #[tokio::test]
    async fn test_member_cannot_create_or_delete() {
        let fx = fixture().await;
        join_as_member(&fx, "bob-1", "bob@example.com").await;

        assert!(matches!(
            fx.registry
                .create_connection("bob-1", &fx.org_id, "prod", "mongodb://db:27017")
                .await,
            Err(RegistryError::PermissionDenied)
        ));

        let connection = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "prod", "mongodb://db:27017")
            .await
            .unwrap();
        assert!(matches!(
            fx.registry
                .delete_connection("bob-1", &fx.org_id, &connection.id)
                .await,
            Err(RegistryError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_resolve_enforces_acl_then_grant_opens_access() {
        let fx = fixture().await;
        fx.connector.register("mongodb://db:27017").await;
        join_as_member(&fx, "bob-1", "bob@example.com").await;

        let connection = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "prod", "mongodb://db:27017")
            .await
            .unwrap();

        // Member without a grant is denied before any network activity.
        assert!(matches!(
            fx.registry.resolve("bob-1", &fx.org_id, &connection.id).await,
            Err(RegistryError::PermissionDenied)
        ));
        assert_eq!(fx.connector.connect_count(), 0);

        fx.tenancy
            .grant_connection("admin-1", &fx.org_id, "bob-1", &connection.id)
            .await
            .unwrap();
        assert!(fx
            .registry
            .resolve("bob-1", &fx.org_id, &connection.id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_resolve_rejects_cross_org_descriptor() {
        let fx = fixture().await;
        fx.connector.register("mongodb://db:27017").await;
        let connection = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "prod", "mongodb://db:27017")
            .await
            .unwrap();

        let other_org = fx
            .tenancy
            .create_organization("admin-1", "Other", "backup-pw")
            .await
            .unwrap();
        // Caller administers the other org, but the descriptor lives elsewhere.
        let err = fx
            .registry
            .resolve("admin-1", &other_org, &connection.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::PermissionDenied | RegistryError::ConnectionNotFound
        ));
    }

    #[tokio::test]
    async fn test_member_listing_is_grant_filtered() {
        let fx = fixture().await;
        join_as_member(&fx, "bob-1", "bob@example.com").await;

        let visible = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "granted", "mongodb://a:27017")
            .await
            .unwrap();
        fx.registry
            .create_connection("admin-1", &fx.org_id, "hidden", "mongodb://b:27017")
            .await
            .unwrap();
        fx.tenancy
            .grant_connection("admin-1", &fx.org_id, "bob-1", &visible.id)
            .await
            .unwrap();

        let admin_view = fx
            .registry
            .list_connections("admin-1", &fx.org_id)
            .await
            .unwrap();
        assert_eq!(admin_view.len(), 2);

        let member_view = fx
            .registry
            .list_connections("bob-1", &fx.org_id)
            .await
            .unwrap();
        assert_eq!(member_view.len(), 1);
        assert_eq!(member_view[0].id, visible.id);
    }

    #[tokio::test]
    async fn test_browse_helpers_and_counts() {
        let fx = fixture().await;
        let source = fx.connector.register("mongodb://db:27017").await;
        source.insert_documents("app", "users", vec![json!({"_id": 1}), json!({"_id": 2})]);
        source.create_collection("app", "empty");

        let connection = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "prod", "mongodb://db:27017")
            .await
            .unwrap();

        let databases = fx
            .registry
            .list_databases("admin-1", &fx.org_id, &connection.id)
            .await
            .unwrap();
        assert_eq!(databases, vec!["app".to_string()]);

        let with_counts = fx
            .registry
            .list_collections("admin-1", &fx.org_id, &connection.id, "app", true)
            .await
            .unwrap();
        assert_eq!(with_counts.len(), 2);
        assert_eq!(with_counts[1].name, "users");
        assert_eq!(with_counts[1].count, Some(2));

        let without_counts = fx
            .registry
            .list_collections("admin-1", &fx.org_id, &connection.id, "app", false)
            .await
            .unwrap();
        assert!(without_counts.iter().all(|c| c.count.is_none()));
    }

    #[tokio::test]
    async fn test_validation_rejects_non_mongodb_uris() {
        let fx = fixture().await;
        assert!(matches!(
            fx.registry
                .create_connection("admin-1", &fx.org_id, "prod", "postgres://db:5432")
                .await,
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            fx.registry
                .create_connection("admin-1", &fx.org_id, "  ", "mongodb://db:27017")
                .await,
            Err(RegistryError::Validation(_))
        ));
    }
}
