//! Error types for object-store operations.

use thiserror::Error;

/// Main error type for object-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The user has no live OAuth session with the store.
    #[error("Not connected to the object store")]
    NotConnected,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("OAuth exchange failed: {0}")]
    OAuth(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type alias for object-store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
