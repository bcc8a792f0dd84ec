//! Error types for the connection registry.

use thiserror::Error;

use crate::source::SourceError;

/// Main error type for registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Permission denied")]
    PermissionDenied,

    /// Covers both a missing descriptor and one outside the caller's
    /// organization.
    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to decrypt connection credentials")]
    DecryptionFailed,

    #[error("Database unreachable: {0}")]
    Unreachable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<SourceError> for RegistryError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Timeout(msg) => RegistryError::Timeout(msg),
            SourceError::Unreachable(msg) | SourceError::Query(msg) => {
                RegistryError::Unreachable(msg)
            }
        }
    }
}

impl From<anchora_tenant::TenantError> for RegistryError {
    fn from(err: anchora_tenant::TenantError) -> Self {
        match err {
            anchora_tenant::TenantError::PermissionDenied => RegistryError::PermissionDenied,
            anchora_tenant::TenantError::NotFound(_) => RegistryError::ConnectionNotFound,
            anchora_tenant::TenantError::Validation(msg) => RegistryError::Validation(msg),
        }
    }
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
