//! Error types for tenancy operations.

use thiserror::Error;

/// Main error type for tenancy operations.
#[derive(Error, Debug)]
pub enum TenantError {
    /// Identity established but a permission predicate failed. Carries no
    /// detail about which row was missing.
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for tenancy operations.
pub type TenantResult<T> = std::result::Result<T, TenantError>;
