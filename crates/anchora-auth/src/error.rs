//! Error types for identity operations.

use thiserror::Error;

/// Main error type for identity operations.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Caller identity could not be established. Covers both unknown
    /// accounts and wrong passwords without distinguishing them.
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Email address is not verified")]
    EmailNotVerified,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for identity operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;
