//! Database models for users.

use crate::api::models::users::{Role, UserCreate};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_verified: bool,
}

impl UserCreateDBRequest {
    /// Build a create request from the admin API model plus a precomputed hash.
    pub fn from_api(api: UserCreate, password_hash: String) -> Self {
        Self {
            name: api.name,
            email: api.email,
            password_hash,
            role: api.role.unwrap_or(Role::User),
            email_verified: false,
        }
    }
}

/// Database request for updating a user
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub password_hash: Option<String>,
}

/// Database row for a user
#[derive(Debug, Clone, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
