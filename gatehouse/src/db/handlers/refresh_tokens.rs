//! Database repository for refresh tokens.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        models::refresh_tokens::{RefreshToken, RefreshTokenCreateRequest},
    },
    types::{TokenId, UserId, abbrev_uuid},
};

pub struct RefreshTokens<'c> {
    db: &'c mut PgConnection,
}

const TOKEN_COLUMNS: &str = "id, token, user_id, expires_at, revoked, created_at";

impl<'c> RefreshTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create(&mut self, request: &RefreshTokenCreateRequest) -> Result<RefreshToken> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, token, user_id, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&request.token)
        .bind(request.user_id)
        .bind(request.expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(token)
    }

    /// Exact-match lookup on the unique token column.
    #[instrument(skip(self, raw_token), err)]
    pub async fn find_by_token(&mut self, raw_token: &str) -> Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token = $1"))
            .bind(raw_token)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(token)
    }

    /// Conditionally revoke a token.
    ///
    /// Returns true only if this call flipped the flag. A false return means
    /// the token was already revoked, which callers use to detect a lost
    /// rotation race: two concurrent holders of the same token cannot both
    /// observe a successful revocation.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn revoke(&mut self, id: TokenId) -> Result<bool> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every outstanding token for a user (logout everywhere).
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password;
    use crate::db::handlers::{Repository, Users};
    use crate::test_utils::test_user_create_request;
    use chrono::{Duration, Utc};
    use sqlx::PgPool;

    async fn seed_user(pool: &PgPool, email: &str) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);
        users.create(&test_user_create_request(email)).await.unwrap().id
    }

    fn create_request(user_id: UserId) -> RefreshTokenCreateRequest {
        RefreshTokenCreateRequest {
            user_id,
            token: password::generate_opaque_token(),
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_create_and_find(pool: PgPool) {
        let user_id = seed_user(&pool, "refresh@example.com").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = RefreshTokens::new(&mut conn);

        let created = repo.create(&create_request(user_id)).await.unwrap();
        assert!(!created.revoked);

        let found = repo.find_by_token(&created.token).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.is_live(Utc::now()));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_revoke_is_single_winner(pool: PgPool) {
        let user_id = seed_user(&pool, "race@example.com").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = RefreshTokens::new(&mut conn);

        let created = repo.create(&create_request(user_id)).await.unwrap();

        // First revocation wins, second observes the token already revoked
        assert!(repo.revoke(created.id).await.unwrap());
        assert!(!repo.revoke(created.id).await.unwrap());

        let reloaded = repo.find_by_token(&created.token).await.unwrap().unwrap();
        assert!(reloaded.revoked);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_revoke_all_for_user(pool: PgPool) {
        let user_id = seed_user(&pool, "all@example.com").await;
        let other_id = seed_user(&pool, "other@example.com").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = RefreshTokens::new(&mut conn);

        repo.create(&create_request(user_id)).await.unwrap();
        repo.create(&create_request(user_id)).await.unwrap();
        let other = repo.create(&create_request(other_id)).await.unwrap();

        let revoked = repo.revoke_all_for_user(user_id).await.unwrap();
        assert_eq!(revoked, 2);

        // Other users' tokens are untouched
        let reloaded = repo.find_by_token(&other.token).await.unwrap().unwrap();
        assert!(!reloaded.revoked);
    }
}
