//! Database models for refresh tokens.

use crate::types::{TokenId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for persisting a newly issued refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenCreateRequest {
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Database row for a refresh token
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: TokenId,
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// A token is live if it has not been revoked and has not expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}
