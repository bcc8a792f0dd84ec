//! User accounts and email verification records.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Verification tokens are honored for one day.
const VERIFICATION_TTL_HOURS: i64 = 24;

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: String,
    /// User email, unique, stored lowercased
    pub email: String,
    /// Optional display username, unique when present
    pub username: Option<String>,
    /// Password hash (PBKDF2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Email verification status
    pub email_verified: bool,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new unverified user. The password must already be hashed.
    pub fn new(email: String, username: Option<String>, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            username,
            password_hash,
            email_verified: false,
            created_at: Utc::now(),
        }
    }
}

/// One-shot email verification token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailVerification {
    /// High-entropy token handed to the mail side-channel
    pub token: String,
    /// User the token verifies
    pub user_id: String,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
}

impl EmailVerification {
    /// Mint a verification record for a user.
    pub fn new(user_id: String) -> Self {
        Self {
            token: generate_token(),
            user_id,
            expires_at: Utc::now() + Duration::hours(VERIFICATION_TTL_HOURS),
        }
    }

    /// Check whether the token is still honored.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Generate a high-entropy opaque token (256 bits, hex).
pub(crate) fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validate registration input shape.
pub(crate) fn validate_registration(email: &str, password: &str) -> AuthResult<()> {
    if !is_valid_email(email) {
        return Err(AuthError::Validation(format!("Invalid email: {}", email)));
    }
    if password.len() < 6 {
        return Err(AuthError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

/// Minimal structural email check; delivery is the real validator.
fn is_valid_email(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        _ => false,
    }
}
