//! Database repository for single-use verification and password reset tokens.

use chrono::Utc;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::password,
    db::{
        errors::Result,
        models::verification_tokens::{TokenType, VerificationToken, VerificationTokenCreateRequest},
    },
    types::{TokenId, UserId, abbrev_uuid},
};

pub struct VerificationTokens<'c> {
    db: &'c mut PgConnection,
}

const TOKEN_COLUMNS: &str = "id, token, user_id, token_type, expires_at, used, created_at";

impl<'c> VerificationTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Issue a new token. The random token string is generated here so callers
    /// never pick their own.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), token_type = %request.token_type), err)]
    pub async fn create(&mut self, request: &VerificationTokenCreateRequest) -> Result<VerificationToken> {
        let token = sqlx::query_as::<_, VerificationToken>(&format!(
            r#"
            INSERT INTO verification_tokens (id, token, user_id, token_type, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(password::generate_opaque_token())
        .bind(request.user_id)
        .bind(request.token_type.as_str())
        .bind(request.expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(token)
    }

    /// Exact-match lookup on the unique token column.
    #[instrument(skip(self, raw_token), err)]
    pub async fn find_by_token(&mut self, raw_token: &str) -> Result<Option<VerificationToken>> {
        let token =
            sqlx::query_as::<_, VerificationToken>(&format!("SELECT {TOKEN_COLUMNS} FROM verification_tokens WHERE token = $1"))
                .bind(raw_token)
                .fetch_optional(&mut *self.db)
                .await?;

        Ok(token)
    }

    /// Consume a token. Irreversible.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_used(&mut self, id: TokenId) -> Result<bool> {
        let result = sqlx::query("UPDATE verification_tokens SET used = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove all tokens of a given type for a user. Called before issuing a
    /// replacement so at most one actionable token exists per (user, type).
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), token_type = %token_type), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId, token_type: TokenType) -> Result<u64> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1 AND token_type = $2")
            .bind(user_id)
            .bind(token_type.as_str())
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

impl VerificationToken {
    /// A token is actionable if it has not been used and has not expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Repository, Users};
    use crate::test_utils::test_user_create_request;
    use chrono::Duration;
    use sqlx::PgPool;

    async fn seed_user(pool: &PgPool, email: &str) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);
        users.create(&test_user_create_request(email)).await.unwrap().id
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_create_and_find(pool: PgPool) {
        let user_id = seed_user(&pool, "tokens@example.com").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = VerificationTokens::new(&mut conn);

        let created = repo
            .create(&VerificationTokenCreateRequest {
                user_id,
                token_type: TokenType::EmailVerification,
                expires_at: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();

        assert_eq!(created.token.len(), 43);
        assert!(!created.used);

        let found = repo.find_by_token(&created.token).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.token_type, TokenType::EmailVerification);

        assert!(repo.find_by_token("no-such-token").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_mark_used_is_irreversible(pool: PgPool) {
        let user_id = seed_user(&pool, "used@example.com").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = VerificationTokens::new(&mut conn);

        let created = repo
            .create(&VerificationTokenCreateRequest {
                user_id,
                token_type: TokenType::PasswordReset,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        assert!(repo.mark_used(created.id).await.unwrap());

        let reloaded = repo.find_by_token(&created.token).await.unwrap().unwrap();
        assert!(reloaded.used);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_delete_for_user_scopes_by_type(pool: PgPool) {
        let user_id = seed_user(&pool, "scoped@example.com").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = VerificationTokens::new(&mut conn);

        let verify = repo
            .create(&VerificationTokenCreateRequest {
                user_id,
                token_type: TokenType::EmailVerification,
                expires_at: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();
        let reset = repo
            .create(&VerificationTokenCreateRequest {
                user_id,
                token_type: TokenType::PasswordReset,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        let deleted = repo.delete_for_user(user_id, TokenType::EmailVerification).await.unwrap();
        assert_eq!(deleted, 1);

        // Only the email verification token is gone
        assert!(repo.find_by_token(&verify.token).await.unwrap().is_none());
        assert!(repo.find_by_token(&reset.token).await.unwrap().is_some());
    }
}
