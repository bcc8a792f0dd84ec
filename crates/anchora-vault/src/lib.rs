//! # Anchora Credential Vault
//!
//! Password hashing and symmetric encryption of secrets at rest for the
//! Anchora backup platform.
//!
//! The vault covers two concerns:
//!
//! - **Password hashing**: PBKDF2-HMAC-SHA256 with a random per-password
//!   salt, verified in constant time.
//! - **Secret encryption**: AES-256-CBC over a data key derived from the
//!   process master key, used for stored MongoDB connection strings and
//!   third-party OAuth tokens.
//!
//! Both output encodings are frozen formats; changing the iteration count,
//! key length, or encoding breaks every stored credential.

#![warn(clippy::all)]

pub mod error;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use vault::CredentialVault;
