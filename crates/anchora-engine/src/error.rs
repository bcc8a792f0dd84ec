//! Error types for the backup engine.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The conditional running insert found an in-flight execution.
    #[error("A backup is already running for schedule {0}")]
    AlreadyRunning(String),

    /// A terminal log was asked to transition again.
    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution exceeded the maximum duration")]
    DeadlineExceeded,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Registry(#[from] anchora_registry::RegistryError),

    #[error(transparent)]
    Store(#[from] anchora_drive::StoreError),
}

impl From<anchora_tenant::TenantError> for EngineError {
    fn from(err: anchora_tenant::TenantError) -> Self {
        match err {
            anchora_tenant::TenantError::PermissionDenied => EngineError::PermissionDenied,
            anchora_tenant::TenantError::NotFound(what) => EngineError::NotFound(what),
            anchora_tenant::TenantError::Validation(msg) => EngineError::Validation(msg),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
