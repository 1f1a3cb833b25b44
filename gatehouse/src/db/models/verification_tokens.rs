//! Database models for single-use verification and password reset tokens.

use crate::types::{TokenId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// The purpose a verification token was issued for, stored as lowercase text
/// in the `verification_tokens.token_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    EmailVerification,
    PasswordReset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::EmailVerification => "email_verification",
            TokenType::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TokenType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "email_verification" => Ok(TokenType::EmailVerification),
            "password_reset" => Ok(TokenType::PasswordReset),
            other => Err(format!("unknown token type: {other}")),
        }
    }
}

/// Database request for issuing a new verification token
#[derive(Debug, Clone)]
pub struct VerificationTokenCreateRequest {
    pub user_id: UserId,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
}

/// Database row for a verification token
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub id: TokenId,
    pub token: String,
    pub user_id: UserId,
    #[sqlx(try_from = "String")]
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
