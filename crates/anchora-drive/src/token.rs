//! Encrypted OAuth token storage.

use std::collections::HashMap;
use std::sync::Arc;

use anchora_vault::CredentialVault;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Stored OAuth token pair. The `(user_id, provider)` pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub user_id: String,
    pub provider: String,
    /// Access token, encrypted at rest
    #[serde(skip_serializing)]
    pub encrypted_access_token: String,
    /// Refresh token, encrypted at rest
    #[serde(skip_serializing)]
    pub encrypted_refresh_token: String,
    /// Access-token expiry
    pub expires_at: DateTime<Utc>,
}

/// Decrypted view of a token pair, held only in transit.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Vault-backed token store.
pub struct TokenStore {
    vault: Arc<CredentialVault>,
    tokens: RwLock<HashMap<(String, String), OAuthToken>>,
}

impl TokenStore {
    /// Create an empty token store.
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            vault,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Encrypt and store a token pair, replacing any previous one.
    pub async fn save(
        &self,
        user_id: &str,
        provider: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let encrypted_access = self
            .vault
            .encrypt(access_token)
            .map_err(|e| StoreError::OAuth(e.to_string()))?;
        let encrypted_refresh = self
            .vault
            .encrypt(refresh_token)
            .map_err(|e| StoreError::OAuth(e.to_string()))?;

        let token = OAuthToken {
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            encrypted_access_token: encrypted_access,
            encrypted_refresh_token: encrypted_refresh,
            expires_at,
        };
        self.tokens
            .write()
            .await
            .insert((user_id.to_string(), provider.to_string()), token);
        debug!(user_id = %user_id, provider = %provider, "oauth tokens stored");
        Ok(())
    }

    /// Decrypt the stored pair for a user.
    pub async fn load(&self, user_id: &str, provider: &str) -> StoreResult<TokenPair> {
        let tokens = self.tokens.read().await;
        let token = tokens
            .get(&(user_id.to_string(), provider.to_string()))
            .ok_or(StoreError::NotConnected)?;

        let access_token = self
            .vault
            .decrypt(&token.encrypted_access_token)
            .map_err(|_| StoreError::NotConnected)?;
        let refresh_token = self
            .vault
            .decrypt(&token.encrypted_refresh_token)
            .map_err(|_| StoreError::NotConnected)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at: token.expires_at,
        })
    }

    /// Whether a pair exists for the user.
    pub async fn contains(&self, user_id: &str, provider: &str) -> bool {
        self.tokens
            .read()
            .await
            .contains_key(&(user_id.to_string(), provider.to_string()))
    }

    /// Drop the stored pair.
    pub async fn delete(&self, user_id: &str, provider: &str) {
        self.tokens
            .write()
            .await
            .remove(&(user_id.to_string(), provider.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> TokenStore {
        TokenStore::new(Arc::new(CredentialVault::new("test-master-key").unwrap()))
    }

    #[tokio::test]
    async fn test_round_trip_and_encryption_at_rest() {
        let store = store();
        let expires = Utc::now() + Duration::hours(1);
        store
            .save("u1", "google", "access-123", "refresh-456", expires)
            .await
            .unwrap();

        // Stored blobs never contain plaintext.
        {
            let tokens = store.tokens.read().await;
            let token = tokens.get(&("u1".to_string(), "google".to_string())).unwrap();
            assert!(!token.encrypted_access_token.contains("access-123"));
            assert!(!token.encrypted_refresh_token.contains("refresh-456"));
        }

        let pair = store.load("u1", "google").await.unwrap();
        assert_eq!(pair.access_token, "access-123");
        assert_eq!(pair.refresh_token, "refresh-456");
        assert_eq!(pair.expires_at, expires);
    }

    #[tokio::test]
    async fn test_missing_pair_is_not_connected() {
        let store = store();
        assert!(matches!(
            store.load("u1", "google").await,
            Err(StoreError::NotConnected)
        ));
        assert!(!store.contains("u1", "google").await);
    }

    #[tokio::test]
    async fn test_save_replaces_and_delete_disconnects() {
        let store = store();
        let expires = Utc::now() + Duration::hours(1);
        store
            .save("u1", "google", "a1", "r1", expires)
            .await
            .unwrap();
        store
            .save("u1", "google", "a2", "r2", expires)
            .await
            .unwrap();

        assert_eq!(store.load("u1", "google").await.unwrap().access_token, "a2");

        store.delete("u1", "google").await;
        assert!(!store.contains("u1", "google").await);
    }
}
