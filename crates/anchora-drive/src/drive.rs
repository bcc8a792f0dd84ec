//! Google Drive client: OAuth session management and artifact transfer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectStore, UploadedObject};
use crate::token::TokenStore;

const PROVIDER: &str = "google";
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const FILES_ENDPOINT: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";
const SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Bound for metadata and OAuth calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh the access token once it is within this window of expiry.
const REFRESH_SLACK_SECS: i64 = 60;

/// Drive client configuration.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Upload bound; archives can be large.
    pub upload_timeout: Duration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            upload_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct FileResource {
    id: String,
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
}

#[derive(Deserialize)]
struct FileList {
    files: Vec<FileResource>,
}

/// Google Drive object store.
pub struct DriveStore {
    config: DriveConfig,
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    /// Per-user refresh serialization; duplicate refresh calls revoke the
    /// previous access token.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DriveStore {
    /// Create a Drive store over the token vault.
    pub fn new(config: DriveConfig, tokens: Arc<TokenStore>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            tokens,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// OAuth consent URL for a user. The state parameter carries the user id
    /// back through the redirect.
    pub fn auth_url(&self, user_id: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            AUTH_ENDPOINT, self.config.client_id, self.config.redirect_uri, SCOPE, user_id
        )
    }

    /// Exchange an authorization code and store the token pair.
    pub async fn finish_oauth(&self, user_id: &str, code: &str) -> StoreResult<()> {
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .timeout(API_TIMEOUT)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(map_oauth_error)?;

        if !response.status().is_success() {
            return Err(StoreError::OAuth(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await.map_err(map_oauth_error)?;
        let refresh = token
            .refresh_token
            .ok_or_else(|| StoreError::OAuth("no refresh token granted".to_string()))?;

        self.tokens
            .save(
                user_id,
                PROVIDER,
                &token.access_token,
                &refresh,
                Utc::now() + chrono::Duration::seconds(token.expires_in),
            )
            .await?;
        info!(user_id = %user_id, "drive session established");
        Ok(())
    }

    /// Drop the user's session.
    pub async fn disconnect(&self, user_id: &str) {
        self.tokens.delete(user_id, PROVIDER).await;
    }

    /// Return a live access token, refreshing serially per user.
    async fn ensure_access_token(&self, user_id: &str) -> StoreResult<String> {
        let pair = self.tokens.load(user_id, PROVIDER).await?;
        let slack = chrono::Duration::seconds(REFRESH_SLACK_SECS);
        if pair.expires_at - slack > Utc::now() {
            return Ok(pair.access_token);
        }

        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let pair = self.tokens.load(user_id, PROVIDER).await?;
        if pair.expires_at - slack > Utc::now() {
            return Ok(pair.access_token);
        }

        debug!(user_id = %user_id, "refreshing drive access token");
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .timeout(API_TIMEOUT)
            .form(&[
                ("refresh_token", pair.refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(map_oauth_error)?;

        if !response.status().is_success() {
            return Err(StoreError::OAuth(format!(
                "token refresh returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await.map_err(map_oauth_error)?;
        let refresh = token.refresh_token.unwrap_or(pair.refresh_token);
        self.tokens
            .save(
                user_id,
                PROVIDER,
                &token.access_token,
                &refresh,
                Utc::now() + chrono::Duration::seconds(token.expires_in),
            )
            .await?;
        Ok(token.access_token)
    }

    /// Resolve a `/`-separated folder path to a folder id, creating missing
    /// segments. Repeated calls reuse existing folders.
    async fn resolve_folder_path(
        &self,
        access_token: &str,
        folder_path: &str,
    ) -> StoreResult<Option<String>> {
        let mut parent: Option<String> = None;
        for segment in folder_path.split('/').filter(|s| !s.is_empty()) {
            let parent_clause = match &parent {
                Some(id) => format!(" and '{}' in parents", id),
                None => " and 'root' in parents".to_string(),
            };
            let query = format!(
                "name = '{}' and mimeType = '{}' and trashed = false{}",
                segment.replace('\'', "\\'"),
                FOLDER_MIME,
                parent_clause
            );

            let response = self
                .http
                .get(FILES_ENDPOINT)
                .timeout(API_TIMEOUT)
                .bearer_auth(access_token)
                .query(&[("q", query.as_str()), ("fields", "files(id)")])
                .send()
                .await
                .map_err(map_upload_error)?;
            if !response.status().is_success() {
                return Err(StoreError::UploadFailed(format!(
                    "folder lookup returned {}",
                    response.status()
                )));
            }
            let listing: FileList = response.json().await.map_err(map_upload_error)?;

            let folder_id = match listing.files.into_iter().next() {
                Some(found) => found.id,
                None => {
                    let mut metadata = json!({
                        "name": segment,
                        "mimeType": FOLDER_MIME,
                    });
                    if let Some(id) = &parent {
                        metadata["parents"] = json!([id]);
                    }
                    let response = self
                        .http
                        .post(FILES_ENDPOINT)
                        .timeout(API_TIMEOUT)
                        .bearer_auth(access_token)
                        .json(&metadata)
                        .send()
                        .await
                        .map_err(map_upload_error)?;
                    if !response.status().is_success() {
                        return Err(StoreError::UploadFailed(format!(
                            "folder creation returned {}",
                            response.status()
                        )));
                    }
                    let created: FileResource =
                        response.json().await.map_err(map_upload_error)?;
                    created.id
                }
            };
            parent = Some(folder_id);
        }
        Ok(parent)
    }
}

#[async_trait]
impl ObjectStore for DriveStore {
    async fn upload_file(
        &self,
        user_id: &str,
        bytes: Bytes,
        file_name: &str,
        mime_type: &str,
        folder_path: &str,
    ) -> StoreResult<UploadedObject> {
        let access_token = self.ensure_access_token(user_id).await?;
        let folder_id = self.resolve_folder_path(&access_token, folder_path).await?;

        let mut metadata = json!({ "name": file_name });
        if let Some(id) = &folder_id {
            metadata["parents"] = json!([id]);
        }

        // Drive expects multipart/related, which reqwest does not compose;
        // build the two-part body by hand.
        let boundary = format!("anchora-{}", Uuid::new_v4());
        let mut body = Vec::with_capacity(bytes.len() + 512);
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata.to_string().as_bytes());
        body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
        body.extend_from_slice(&bytes);
        body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());

        let response = self
            .http
            .post(UPLOAD_ENDPOINT)
            .timeout(self.config.upload_timeout)
            .bearer_auth(&access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id,webViewLink")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .map_err(map_upload_error)?;

        if !response.status().is_success() {
            return Err(StoreError::UploadFailed(format!(
                "upload returned {}",
                response.status()
            )));
        }
        let uploaded: FileResource = response.json().await.map_err(map_upload_error)?;
        info!(user_id = %user_id, file = %file_name, "artifact uploaded");
        Ok(UploadedObject {
            file_id: uploaded.id,
            web_view_link: uploaded.web_view_link,
        })
    }

    async fn delete_file(&self, user_id: &str, file_id: &str) -> StoreResult<()> {
        let access_token = self.ensure_access_token(user_id).await?;
        let response = self
            .http
            .delete(format!("{}/{}", FILES_ENDPOINT, file_id))
            .timeout(API_TIMEOUT)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| StoreError::DeleteFailed(e.to_string()))?;

        // 404 counts as deleted; retention retries would otherwise loop.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            warn!(file_id = %file_id, status = %response.status(), "delete rejected");
            return Err(StoreError::DeleteFailed(format!(
                "delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn is_connected(&self, user_id: &str) -> bool {
        self.tokens.contains(user_id, PROVIDER).await
    }
}

fn map_oauth_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else {
        StoreError::OAuth(err.to_string())
    }
}

fn map_upload_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else {
        StoreError::UploadFailed(err.to_string())
    }
}
