//! # Anchora Identity
//!
//! User accounts, one-shot email verification, and TTL'd login sessions for
//! the Anchora backup platform.
//!
//! The [`IdentityStore`] is the single entry point: registration surfaces a
//! verification token for the mail side-channel, login mints a fresh session
//! per successful attempt, and session lookup enforces expiry.

#![warn(clippy::all)]

pub mod error;
pub mod identity;
pub mod session;
pub mod user;

pub use error::{AuthError, AuthResult};
pub use identity::{IdentityStore, RegisteredUser};
pub use session::Session;
pub use user::User;
