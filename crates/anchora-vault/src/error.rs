//! Error types for the credential vault.

use thiserror::Error;

/// Main error type for vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Master key must not be empty")]
    MissingMasterKey,

    #[error("Input must not be empty")]
    EmptyInput,

    /// Decryption failed, the stored blob is malformed, or the recovered
    /// plaintext was empty. Deliberately carries no detail.
    #[error("Invalid credential")]
    InvalidCredential,
}

/// Result type alias for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;
