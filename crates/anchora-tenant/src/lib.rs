//! # Anchora Tenancy
//!
//! Organizations, memberships, invitations, per-connection grants, and the
//! permission predicates that gate every externally-triggered operation.
//!
//! The tenancy store is the platform's single trust boundary: callers never
//! pre-filter, they ask the predicates. `PermissionDenied` deliberately does
//! not reveal whether a membership or a grant was the missing row.

#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod store;

pub use error::{TenantError, TenantResult};
pub use model::{
    ConnectionPermission, Invitation, InvitationStatus, Membership, Organization,
    OrganizationSummary, Role,
};
pub use store::TenancyStore;
