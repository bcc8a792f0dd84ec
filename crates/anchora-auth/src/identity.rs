//! The identity store: registration, verification, login, session lookup.

use std::collections::HashMap;
use std::sync::Arc;

use anchora_vault::CredentialVault;
use chrono::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};
use crate::session::Session;
use crate::user::{validate_registration, EmailVerification, User};

/// Outcome of a successful registration.
///
/// The verification token is surfaced to the mail side-channel; it is never
/// accepted as a login credential.
#[derive(Debug, Clone)]
pub struct RegisteredUser {
    pub user_id: String,
    pub verification_token: String,
}

#[derive(Default)]
struct IdentityState {
    /// Users by id.
    users: HashMap<String, User>,
    /// Lowercased email -> user id. Unique.
    by_email: HashMap<String, String>,
    /// Username -> user id. Unique when present.
    by_username: HashMap<String, String>,
    /// Pending verification tokens.
    verifications: HashMap<String, EmailVerification>,
    /// Live sessions by token.
    sessions: HashMap<String, Session>,
}

/// User identity service.
pub struct IdentityStore {
    vault: Arc<CredentialVault>,
    session_ttl: Duration,
    state: RwLock<IdentityState>,
}

impl IdentityStore {
    /// Create an identity store with the configured session TTL.
    pub fn new(vault: Arc<CredentialVault>, session_ttl: Duration) -> Self {
        Self {
            vault,
            session_ttl,
            state: RwLock::new(IdentityState::default()),
        }
    }

    /// Register a new account.
    ///
    /// Email is lowercased and must be unique; the username, when given,
    /// must be unique too. The account starts unverified.
    pub async fn register(
        &self,
        email: &str,
        username: Option<&str>,
        password: &str,
    ) -> AuthResult<RegisteredUser> {
        let email = email.trim().to_lowercase();
        validate_registration(&email, password)?;

        let password_hash = self
            .vault
            .hash_password(password)
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let mut state = self.state.write().await;
        if state.by_email.contains_key(&email) {
            return Err(AuthError::Validation(
                "Email is already registered".to_string(),
            ));
        }
        if let Some(name) = username {
            if state.by_username.contains_key(name) {
                return Err(AuthError::Validation(
                    "Username is already taken".to_string(),
                ));
            }
        }

        let user = User::new(email.clone(), username.map(str::to_string), password_hash);
        let verification = EmailVerification::new(user.id.clone());
        let registered = RegisteredUser {
            user_id: user.id.clone(),
            verification_token: verification.token.clone(),
        };

        state.by_email.insert(email, user.id.clone());
        if let Some(name) = &user.username {
            state.by_username.insert(name.clone(), user.id.clone());
        }
        state
            .verifications
            .insert(verification.token.clone(), verification);
        state.users.insert(user.id.clone(), user);

        info!(user_id = %registered.user_id, "registered new user");
        Ok(registered)
    }

    /// Redeem a one-shot email verification token.
    pub async fn verify_email(&self, token: &str) -> AuthResult<()> {
        let mut state = self.state.write().await;
        let verification = state
            .verifications
            .remove(token)
            .ok_or_else(|| AuthError::NotFound("Verification token".to_string()))?;

        if verification.is_expired() {
            return Err(AuthError::NotFound("Verification token".to_string()));
        }

        let user = state
            .users
            .get_mut(&verification.user_id)
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;
        user.email_verified = true;

        info!(user_id = %verification.user_id, "email verified");
        Ok(())
    }

    /// Authenticate and mint a fresh session.
    ///
    /// Unknown accounts and wrong passwords both yield `AuthFailed`;
    /// unverified accounts yield `EmailNotVerified`.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Session> {
        let email = email.trim().to_lowercase();

        let mut state = self.state.write().await;
        let user = match state.by_email.get(&email).and_then(|id| state.users.get(id)) {
            Some(user) => user.clone(),
            None => return Err(AuthError::AuthFailed),
        };

        if !self.vault.verify_password(password, &user.password_hash) {
            return Err(AuthError::AuthFailed);
        }
        if !user.email_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let session = Session::new(user.id.clone(), self.session_ttl);
        state.sessions.insert(session.token.clone(), session.clone());
        debug!(user_id = %user.id, "session minted");
        Ok(session)
    }

    /// Resolve a session token to its user, if the session is live.
    pub async fn current_user(&self, token: &str) -> AuthResult<Option<User>> {
        let state = self.state.read().await;
        match state.sessions.get(token) {
            Some(session) if !session.is_expired() => {
                Ok(state.users.get(&session.user_id).cloned())
            }
            _ => Ok(None),
        }
    }

    /// Drop a session.
    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        self.state.write().await.sessions.remove(token);
        Ok(())
    }

    /// Look up a user by id.
    pub async fn user(&self, user_id: &str) -> Option<User> {
        self.state.read().await.users.get(user_id).cloned()
    }

    /// Cull expired sessions, returning how many were removed.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .sessions
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.token.clone())
            .collect();
        let count = expired.len();
        for token in expired {
            state.sessions.remove(&token);
        }
        if count > 0 {
            debug!(count, "culled expired sessions");
        }
        count
    }
}
