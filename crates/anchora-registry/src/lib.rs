//! # Anchora Connection Registry
//!
//! Saved MongoDB connection descriptors scoped to an organization, and their
//! resolution into live, pooled clients.
//!
//! Connection strings are encrypted at rest by the vault and never persisted
//! in plaintext. Resolution runs the tenancy access predicate, decrypts the
//! URI, and hands out a pooled [`source::DocumentSource`] probed for
//! liveness. The `DocumentSource`/`SourceConnector` pair is the seam to the
//! MongoDB driver; `anchora-mongo` provides the driver-backed implementation
//! and [`memory`] an in-process one for tests.

#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod pool;
pub mod registry;
pub mod source;

pub use error::{RegistryError, RegistryResult};
pub use pool::ClientPool;
pub use registry::{CollectionInfo, Connection, ConnectionRegistry, ResolvedConnection};
pub use source::{DocumentSource, FindQuery, SourceConnector, SourceError, SourceResult};
