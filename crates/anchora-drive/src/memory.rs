//! In-memory object store for tests and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectStore, UploadedObject};

/// One stored object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub user_id: String,
    pub file_name: String,
    pub folder_path: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// In-memory [`ObjectStore`] with failure injection.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads fail.
    pub fn set_upload_failure(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Fetch a stored object by id.
    pub fn object(&self, file_id: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(file_id).cloned()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload_file(
        &self,
        user_id: &str,
        bytes: Bytes,
        file_name: &str,
        mime_type: &str,
        folder_path: &str,
    ) -> StoreResult<UploadedObject> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::UploadFailed("injected failure".to_string()));
        }

        let file_id = Uuid::new_v4().to_string();
        self.objects.lock().unwrap().insert(
            file_id.clone(),
            StoredObject {
                user_id: user_id.to_string(),
                file_name: file_name.to_string(),
                folder_path: folder_path.to_string(),
                mime_type: mime_type.to_string(),
                bytes,
            },
        );
        Ok(UploadedObject {
            web_view_link: Some(format!("memory://{}", file_id)),
            file_id,
        })
    }

    async fn delete_file(&self, _user_id: &str, file_id: &str) -> StoreResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::DeleteFailed(format!("no object {}", file_id)))
    }

    async fn is_connected(&self, _user_id: &str) -> bool {
        true
    }
}
