//! Object-store trait the engine uploads through.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Handle to an uploaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedObject {
    /// Store-assigned object id
    pub file_id: String,
    /// Browser-facing link, when the store provides one
    pub web_view_link: Option<String>,
}

/// Store for backup artifacts, keyed by the acting user's session.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a file under a `/`-separated logical folder path, creating
    /// missing folders idempotently.
    async fn upload_file(
        &self,
        user_id: &str,
        bytes: Bytes,
        file_name: &str,
        mime_type: &str,
        folder_path: &str,
    ) -> StoreResult<UploadedObject>;

    /// Delete an object by id.
    async fn delete_file(&self, user_id: &str, file_id: &str) -> StoreResult<()>;

    /// Whether the user has a live session with the store.
    async fn is_connected(&self, user_id: &str) -> bool;
}
