//! The tenancy store and its permission predicates.

use std::collections::HashMap;
use std::sync::Arc;

use anchora_vault::CredentialVault;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{TenantError, TenantResult};
use crate::model::{
    ConnectionPermission, Invitation, InvitationStatus, Membership, Organization,
    OrganizationSummary, Role,
};

#[derive(Default)]
struct TenancyState {
    /// Organizations by id.
    organizations: HashMap<String, Organization>,
    /// Memberships keyed by `(organization_id, user_id)`.
    memberships: HashMap<(String, String), Membership>,
    /// Invitations keyed by redemption token.
    invitations: HashMap<String, Invitation>,
    /// Connection grants keyed by `(user_id, connection_id)`.
    permissions: HashMap<(String, String), ConnectionPermission>,
}

/// Organizations, memberships, and access control.
///
/// Every mutating operation runs its permission predicate before touching
/// state; callers must not pre-filter.
pub struct TenancyStore {
    vault: Arc<CredentialVault>,
    state: RwLock<TenancyState>,
}

impl TenancyStore {
    /// Create an empty tenancy store.
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            vault,
            state: RwLock::new(TenancyState::default()),
        }
    }

    // ---- organizations ----

    /// Create an organization and its admin membership atomically.
    pub async fn create_organization(
        &self,
        user_id: &str,
        name: &str,
        backup_password: &str,
    ) -> TenantResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TenantError::Validation(
                "Organization name must not be empty".to_string(),
            ));
        }
        if backup_password.len() < 6 {
            return Err(TenantError::Validation(
                "Backup password must be at least 6 characters".to_string(),
            ));
        }

        let hash = self
            .vault
            .hash_password(backup_password)
            .map_err(|e| TenantError::Validation(e.to_string()))?;

        let organization = Organization::new(name.to_string(), user_id.to_string(), hash);
        let org_id = organization.id.clone();
        let membership = Membership {
            organization_id: org_id.clone(),
            user_id: user_id.to_string(),
            role: Role::Admin,
            joined_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        state
            .memberships
            .insert((org_id.clone(), user_id.to_string()), membership);
        state.organizations.insert(org_id.clone(), organization);

        info!(org_id = %org_id, user_id = %user_id, "organization created");
        Ok(org_id)
    }

    /// List organizations the user belongs to, with their role.
    pub async fn list_organizations_for_user(
        &self,
        user_id: &str,
    ) -> TenantResult<Vec<OrganizationSummary>> {
        let state = self.state.read().await;
        let mut summaries: Vec<OrganizationSummary> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                state
                    .organizations
                    .get(&m.organization_id)
                    .map(|org| OrganizationSummary {
                        id: org.id.clone(),
                        name: org.name.clone(),
                        role: m.role,
                        joined_at: m.joined_at,
                        created_at: org.created_at,
                    })
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(summaries)
    }

    /// Load an organization record. Internal API for sibling services;
    /// external callers go through the predicates.
    pub async fn organization(&self, org_id: &str) -> Option<Organization> {
        self.state.read().await.organizations.get(org_id).cloned()
    }

    /// Delete an organization and every tenancy row it owns.
    ///
    /// Connections, schedules, and logs are owned by sibling stores; the
    /// runtime cascades into them after this call succeeds.
    pub async fn delete_organization(&self, admin_id: &str, org_id: &str) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;

        state.organizations.remove(org_id);
        state.memberships.retain(|_, m| m.organization_id != org_id);
        state.invitations.retain(|_, i| i.organization_id != org_id);
        state.permissions.retain(|_, p| p.organization_id != org_id);

        info!(org_id = %org_id, "organization deleted");
        Ok(())
    }

    /// Configure the notification channel for an organization.
    pub async fn set_notification_channel(
        &self,
        admin_id: &str,
        org_id: &str,
        bot_token: Option<String>,
        chat_id: Option<String>,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;
        let org = state
            .organizations
            .get_mut(org_id)
            .ok_or_else(|| TenantError::NotFound("Organization".to_string()))?;
        org.telegram_bot_token = bot_token;
        org.telegram_chat_id = chat_id;
        Ok(())
    }

    // ---- backup password ----

    /// Replace the organization backup password.
    pub async fn reset_backup_password(
        &self,
        admin_id: &str,
        org_id: &str,
        new_password: &str,
    ) -> TenantResult<()> {
        if new_password.len() < 6 {
            return Err(TenantError::Validation(
                "Backup password must be at least 6 characters".to_string(),
            ));
        }
        let hash = self
            .vault
            .hash_password(new_password)
            .map_err(|e| TenantError::Validation(e.to_string()))?;

        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;
        let org = state
            .organizations
            .get_mut(org_id)
            .ok_or_else(|| TenantError::NotFound("Organization".to_string()))?;
        org.backup_password_hash = hash;
        info!(org_id = %org_id, "backup password reset");
        Ok(())
    }

    /// Verify the organization backup password.
    pub async fn verify_backup_password(&self, org_id: &str, plaintext: &str) -> bool {
        match self.state.read().await.organizations.get(org_id) {
            Some(org) => self
                .vault
                .verify_password(plaintext, &org.backup_password_hash),
            None => false,
        }
    }

    // ---- invitations ----

    /// Invite an email address into an organization.
    pub async fn invite(
        &self,
        admin_id: &str,
        org_id: &str,
        email: &str,
    ) -> TenantResult<Invitation> {
        if !email.contains('@') {
            return Err(TenantError::Validation(format!("Invalid email: {}", email)));
        }

        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;

        let invitation = Invitation::new(
            org_id.to_string(),
            email.to_string(),
            admin_id.to_string(),
        );
        let out = invitation.clone();
        state.invitations.insert(invitation.token.clone(), invitation);

        info!(org_id = %org_id, "invitation created");
        Ok(out)
    }

    /// Redeem an invitation token, creating a member row.
    ///
    /// The accepting user's email must be verified and must match the
    /// invited address case-insensitively.
    pub async fn accept_invitation(
        &self,
        user_id: &str,
        user_email: &str,
        email_verified: bool,
        token: &str,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        let invitation = state
            .invitations
            .get(token)
            .cloned()
            .ok_or_else(|| TenantError::NotFound("Invitation".to_string()))?;

        if !invitation.is_redeemable() {
            return Err(TenantError::NotFound("Invitation".to_string()));
        }
        if !email_verified || invitation.email != user_email.to_lowercase() {
            return Err(TenantError::PermissionDenied);
        }
        if !state.organizations.contains_key(&invitation.organization_id) {
            return Err(TenantError::NotFound("Organization".to_string()));
        }

        let key = (invitation.organization_id.clone(), user_id.to_string());
        if state.memberships.contains_key(&key) {
            return Err(TenantError::Validation(
                "Already a member of this organization".to_string(),
            ));
        }

        state.memberships.insert(
            key,
            Membership {
                organization_id: invitation.organization_id.clone(),
                user_id: user_id.to_string(),
                role: Role::Member,
                joined_at: Utc::now(),
            },
        );
        if let Some(stored) = state.invitations.get_mut(token) {
            stored.status = InvitationStatus::Accepted;
        }

        info!(org_id = %invitation.organization_id, user_id = %user_id, "invitation accepted");
        Ok(())
    }

    /// Revoke a pending invitation.
    pub async fn revoke_invitation(
        &self,
        admin_id: &str,
        org_id: &str,
        invitation_id: &str,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;

        let invitation = state
            .invitations
            .values_mut()
            .find(|i| i.id == invitation_id && i.organization_id == org_id)
            .ok_or_else(|| TenantError::NotFound("Invitation".to_string()))?;
        invitation.status = InvitationStatus::Revoked;
        Ok(())
    }

    /// List invitations for an organization.
    pub async fn list_invitations(
        &self,
        admin_id: &str,
        org_id: &str,
    ) -> TenantResult<Vec<Invitation>> {
        let state = self.state.read().await;
        require_admin_locked(&state, admin_id, org_id)?;
        Ok(state
            .invitations
            .values()
            .filter(|i| i.organization_id == org_id)
            .cloned()
            .collect())
    }

    // ---- members ----

    /// List memberships of an organization. Visible to any member.
    pub async fn list_members(&self, user_id: &str, org_id: &str) -> TenantResult<Vec<Membership>> {
        let state = self.state.read().await;
        if !is_member_locked(&state, user_id, org_id) {
            return Err(TenantError::PermissionDenied);
        }
        Ok(state
            .memberships
            .values()
            .filter(|m| m.organization_id == org_id)
            .cloned()
            .collect())
    }

    /// Change a member's role.
    pub async fn set_role(
        &self,
        admin_id: &str,
        org_id: &str,
        target_user_id: &str,
        role: Role,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;

        if role == Role::Member && is_last_admin_locked(&state, target_user_id, org_id) {
            return Err(TenantError::Validation(
                "An organization must keep at least one admin".to_string(),
            ));
        }

        let membership = state
            .memberships
            .get_mut(&(org_id.to_string(), target_user_id.to_string()))
            .ok_or_else(|| TenantError::NotFound("Member".to_string()))?;
        membership.role = role;
        debug!(org_id = %org_id, user_id = %target_user_id, ?role, "role changed");
        Ok(())
    }

    /// Remove a member and their connection grants in the organization.
    pub async fn remove_member(
        &self,
        admin_id: &str,
        org_id: &str,
        target_user_id: &str,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;

        if is_last_admin_locked(&state, target_user_id, org_id) {
            return Err(TenantError::Validation(
                "An organization must keep at least one admin".to_string(),
            ));
        }

        state
            .memberships
            .remove(&(org_id.to_string(), target_user_id.to_string()))
            .ok_or_else(|| TenantError::NotFound("Member".to_string()))?;
        state
            .permissions
            .retain(|_, p| !(p.organization_id == org_id && p.user_id == target_user_id));

        info!(org_id = %org_id, user_id = %target_user_id, "member removed");
        Ok(())
    }

    // ---- connection grants ----

    /// Grant a member access to a connection.
    ///
    /// The caller is responsible for having resolved the connection within
    /// this organization; the grant itself records the triple.
    pub async fn grant_connection(
        &self,
        admin_id: &str,
        org_id: &str,
        member_id: &str,
        connection_id: &str,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;

        if !state
            .memberships
            .contains_key(&(org_id.to_string(), member_id.to_string()))
        {
            return Err(TenantError::NotFound("Member".to_string()));
        }

        state.permissions.insert(
            (member_id.to_string(), connection_id.to_string()),
            ConnectionPermission {
                user_id: member_id.to_string(),
                connection_id: connection_id.to_string(),
                organization_id: org_id.to_string(),
                granted_at: Utc::now(),
            },
        );
        debug!(org_id = %org_id, user_id = %member_id, connection_id = %connection_id, "connection granted");
        Ok(())
    }

    /// Revoke a member's access to a connection.
    pub async fn revoke_connection(
        &self,
        admin_id: &str,
        org_id: &str,
        member_id: &str,
        connection_id: &str,
    ) -> TenantResult<()> {
        let mut state = self.state.write().await;
        require_admin_locked(&state, admin_id, org_id)?;
        state
            .permissions
            .remove(&(member_id.to_string(), connection_id.to_string()))
            .ok_or_else(|| TenantError::NotFound("Permission".to_string()))?;
        Ok(())
    }

    /// Drop every grant referencing a deleted connection.
    pub async fn purge_connection_grants(&self, connection_id: &str) {
        let mut state = self.state.write().await;
        state.permissions.retain(|_, p| p.connection_id != connection_id);
    }

    // ---- predicates ----

    /// Membership row exists.
    pub async fn is_member(&self, user_id: &str, org_id: &str) -> bool {
        is_member_locked(&*self.state.read().await, user_id, org_id)
    }

    /// Membership row exists with the admin role.
    pub async fn is_admin(&self, user_id: &str, org_id: &str) -> bool {
        is_admin_locked(&*self.state.read().await, user_id, org_id)
    }

    /// Admins see every connection in their organization; members need an
    /// explicit grant row.
    pub async fn can_access_connection(
        &self,
        user_id: &str,
        connection_id: &str,
        org_id: &str,
    ) -> bool {
        let state = self.state.read().await;
        if is_admin_locked(&state, user_id, org_id) {
            return true;
        }
        if !is_member_locked(&state, user_id, org_id) {
            return false;
        }
        state
            .permissions
            .get(&(user_id.to_string(), connection_id.to_string()))
            .map(|p| p.organization_id == org_id)
            .unwrap_or(false)
    }

    /// Connection management is admin-only.
    pub async fn can_manage_connections(&self, user_id: &str, org_id: &str) -> bool {
        self.is_admin(user_id, org_id).await
    }

    /// Admin role plus the organization backup password.
    ///
    /// This is the gate in front of every backup and export operation.
    pub async fn can_backup(&self, user_id: &str, org_id: &str, backup_password: &str) -> bool {
        if !self.is_admin(user_id, org_id).await {
            return false;
        }
        let ok = self.verify_backup_password(org_id, backup_password).await;
        if !ok {
            warn!(org_id = %org_id, user_id = %user_id, "backup password rejected");
        }
        ok
    }

    /// Fail with `PermissionDenied` unless the user administers the org.
    pub async fn require_admin(&self, user_id: &str, org_id: &str) -> TenantResult<()> {
        require_admin_locked(&*self.state.read().await, user_id, org_id)
    }

    /// Fail with `PermissionDenied` unless the user belongs to the org.
    pub async fn require_member(&self, user_id: &str, org_id: &str) -> TenantResult<()> {
        if is_member_locked(&*self.state.read().await, user_id, org_id) {
            Ok(())
        } else {
            Err(TenantError::PermissionDenied)
        }
    }

    /// Fail with `PermissionDenied` unless the user may use the connection.
    pub async fn require_connection_access(
        &self,
        user_id: &str,
        connection_id: &str,
        org_id: &str,
    ) -> TenantResult<()> {
        if self.can_access_connection(user_id, connection_id, org_id).await {
            Ok(())
        } else {
            Err(TenantError::PermissionDenied)
        }
    }
}

fn is_member_locked(state: &TenancyState, user_id: &str, org_id: &str) -> bool {
    state
        .memberships
        .contains_key(&(org_id.to_string(), user_id.to_string()))
}

fn is_admin_locked(state: &TenancyState, user_id: &str, org_id: &str) -> bool {
    state
        .memberships
        .get(&(org_id.to_string(), user_id.to_string()))
        .map(|m| m.role == Role::Admin)
        .unwrap_or(false)
}

fn is_last_admin_locked(state: &TenancyState, user_id: &str, org_id: &str) -> bool {
    let target_is_admin = is_admin_locked(state, user_id, org_id);
    let admin_count = state
        .memberships
        .values()
        .filter(|m| m.organization_id == org_id && m.role == Role::Admin)
        .count();
    target_is_admin && admin_count <= 1
}

fn require_admin_locked(state: &TenancyState, user_id: &str, org_id: &str) -> TenantResult<()> {
    if is_admin_locked(state, user_id, org_id) {
        Ok(())
    } else {
        Err(TenantError::PermissionDenied)
    }
}
