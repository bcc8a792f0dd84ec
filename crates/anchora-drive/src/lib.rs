//! # Anchora Drive
//!
//! The object-store collaborator: per-user OAuth sessions against Google
//! Drive, idempotent folder-path creation, multipart uploads, and deletes.
//!
//! The engine depends only on the [`store::ObjectStore`] trait; the Drive
//! client is one implementation, and [`memory::MemoryObjectStore`] backs
//! tests. OAuth tokens rest encrypted in the vault-backed [`token::TokenStore`].

#![warn(clippy::all)]

pub mod drive;
pub mod error;
pub mod memory;
pub mod store;
pub mod token;

pub use drive::{DriveConfig, DriveStore};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryObjectStore;
pub use store::{ObjectStore, UploadedObject};
pub use token::{OAuthToken, TokenStore};
