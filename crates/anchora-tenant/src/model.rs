//! Tenancy entities: organizations, memberships, invitations, grants.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invitations are honored for seven days.
const INVITATION_TTL_DAYS: i64 = 7;

/// Role within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control: members, connections, schedules, backups
    Admin,
    /// Read access to explicitly granted connections
    Member,
}

/// Tenancy unit owning connections, schedules, and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Unique organization ID
    pub id: String,
    /// Display name
    pub name: String,
    /// User who created the organization
    pub created_by: String,
    /// Backup password hash; gates all backup and export operations
    #[serde(skip_serializing)]
    pub backup_password_hash: String,
    /// Telegram bot token for notifications
    #[serde(skip_serializing)]
    pub telegram_bot_token: Option<String>,
    /// Telegram chat the bot posts to
    pub telegram_chat_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Organization {
    /// Create a new organization. The backup password must already be hashed.
    pub fn new(name: String, created_by: String, backup_password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            created_by,
            backup_password_hash,
            telegram_bot_token: None,
            telegram_chat_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Membership row. The `(organization_id, user_id)` pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub organization_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Invitation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

/// Invitation to join an organization, redeemed by token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    /// Unique invitation ID
    pub id: String,
    /// Organization the invitee joins
    pub organization_id: String,
    /// Invited email; must match the accepting user's verified email
    pub email: String,
    /// High-entropy redemption token
    pub token: String,
    /// Admin who sent the invitation
    pub invited_by: String,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
    /// Lifecycle state
    pub status: InvitationStatus,
}

impl Invitation {
    /// Mint a pending invitation.
    pub fn new(organization_id: String, email: String, invited_by: String) -> Self {
        let mut token = [0u8; 32];
        OsRng.fill_bytes(&mut token);
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id,
            email: email.to_lowercase(),
            token: hex::encode(token),
            invited_by,
            expires_at: Utc::now() + Duration::days(INVITATION_TTL_DAYS),
            status: InvitationStatus::Pending,
        }
    }

    /// Check whether the invitation can still be redeemed.
    pub fn is_redeemable(&self) -> bool {
        self.status == InvitationStatus::Pending && Utc::now() < self.expires_at
    }
}

/// Per-connection access grant for a member. Admins need no row.
/// The `(user_id, connection_id)` pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPermission {
    pub user_id: String,
    pub connection_id: String,
    pub organization_id: String,
    pub granted_at: DateTime<Utc>,
}

/// Organization as seen by one of its members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invitation_email_lowercased() {
        let inv = Invitation::new("o1".into(), "Bob@Example.COM".into(), "u1".into());
        assert_eq!(inv.email, "bob@example.com");
        assert!(inv.is_redeemable());
        assert_eq!(inv.token.len(), 64);
    }

    #[test]
    fn test_revoked_invitation_not_redeemable() {
        let mut inv = Invitation::new("o1".into(), "bob@example.com".into(), "u1".into());
        inv.status = InvitationStatus::Revoked;
        assert!(!inv.is_redeemable());
    }
}
