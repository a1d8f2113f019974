//! Authenticator contract consumed by the gateway.
//!
//! Token issuance belongs to the rest of the application; the gateway only
//! needs to turn a presented credential into a user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AuthError, UserId};

/// The identity behind a verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

/// Verifies a credential presented during the handshake.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the user it belongs to.
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}
