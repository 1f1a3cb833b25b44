//! Account lifecycle flows.
//!
//! [`AuthFlows`] implements the full set of account operations on top of the
//! database repositories: registration, login, refresh token rotation, email
//! verification, password reset and logout. HTTP handlers stay thin and
//! delegate here.
//!
//! Two rules shape several of these flows:
//!
//! - Anti-enumeration: login failures never reveal whether the email exists,
//!   and forgot-password returns the same neutral message either way.
//! - Single use: refresh tokens are revoked on rotation with a conditional
//!   update, so concurrent reuse of the same token has exactly one winner.
//!   Verification and reset tokens are consumed via a `used` flag.

use chrono::Utc;
use tracing::instrument;

use crate::{
    AppState,
    api::models::auth::{
        LoginRequest, MessageResponse, RefreshRequest, RegisterRequest, TokenPairResponse,
    },
    auth::{password, tokens},
    db::{
        errors::DbError,
        handlers::{RefreshTokens, Repository, Users, VerificationTokens},
        models::{
            refresh_tokens::RefreshTokenCreateRequest,
            users::{UserCreateDBRequest, UserDBResponse},
            verification_tokens::{TokenType, VerificationToken, VerificationTokenCreateRequest},
        },
    },
    email::{EmailRequest, EmailTemplate},
    errors::{AuthError, Error, Result},
};

pub struct AuthFlows<'a> {
    state: &'a AppState,
}

impl<'a> AuthFlows<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// Create an unverified account and email a verification link.
    ///
    /// The duplicate-email check is repeated by the unique constraint on
    /// insert, so a concurrent registration for the same address surfaces as
    /// [`AuthError::EmailAlreadyExists`] rather than a constraint error.
    #[instrument(skip(self, request), fields(email = %request.email), err)]
    pub async fn register(&self, request: RegisterRequest) -> Result<MessageResponse> {
        let native = &self.state.config.auth.native;
        if !native.enabled || !native.allow_registration {
            return Err(Error::BadRequest {
                message: "Registration is currently disabled".to_string(),
            });
        }

        self.validate_password(&request.password)?;

        let mut txn = self.state.db.begin().await.map_err(DbError::from)?;

        if Users::new(&mut txn).get_user_by_email(&request.email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists.into());
        }

        let password_hash = self.hash_password(request.password).await?;

        let user = match Users::new(&mut txn)
            .create(&UserCreateDBRequest {
                name: request.name,
                email: request.email,
                password_hash,
                role: crate::api::models::users::Role::User,
                email_verified: false,
            })
            .await
        {
            Ok(user) => user,
            Err(DbError::UniqueViolation { .. }) => return Err(AuthError::EmailAlreadyExists.into()),
            Err(e) => return Err(e.into()),
        };

        let token = self
            .issue_verification_token(&mut txn, user.id, TokenType::EmailVerification)
            .await?;

        txn.commit().await.map_err(DbError::from)?;

        self.state.mailer.enqueue(EmailRequest {
            to: user.email,
            template: EmailTemplate::VerifyEmail {
                name: user.name,
                token: token.token,
            },
        });

        Ok(MessageResponse {
            message: "Registration successful. Please check your email to verify your account.".to_string(),
        })
    }

    /// Check credentials and issue a token pair.
    ///
    /// Unknown email and wrong password both return
    /// [`AuthError::InvalidCredentials`].
    #[instrument(skip(self, request), fields(email = %request.email), err)]
    pub async fn login(&self, request: LoginRequest) -> Result<TokenPairResponse> {
        let mut conn = self.state.db.acquire().await.map_err(DbError::from)?;

        let user = Users::new(&mut conn)
            .get_user_by_email(&request.email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || password::verify_string(&request.password, &hash))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("join password verify task: {e}"),
            })??;

        if !matches {
            return Err(AuthError::InvalidCredentials.into());
        }

        if !user.email_verified {
            return Err(AuthError::EmailNotVerified.into());
        }

        self.issue_token_pair(&mut conn, &user).await
    }

    /// Rotate a refresh token: revoke the presented token and issue a fresh
    /// pair.
    ///
    /// The revocation is conditional on the token still being live, so if two
    /// requests race with the same token only one receives new tokens and the
    /// other gets [`AuthError::RefreshRevoked`].
    #[instrument(skip(self, request), err)]
    pub async fn refresh(&self, request: RefreshRequest) -> Result<TokenPairResponse> {
        let mut txn = self.state.db.begin().await.map_err(DbError::from)?;

        let token = RefreshTokens::new(&mut txn)
            .find_by_token(&request.refresh_token)
            .await?
            .ok_or(AuthError::RefreshRevoked)?;

        if token.revoked {
            return Err(AuthError::RefreshRevoked.into());
        }
        if !token.is_live(Utc::now()) {
            return Err(AuthError::TokenExpired.into());
        }

        // Lost race: someone else rotated this token first
        if !RefreshTokens::new(&mut txn).revoke(token.id).await? {
            return Err(AuthError::RefreshRevoked.into());
        }

        let user = Users::new(&mut txn)
            .get_by_id(token.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let pair = self.issue_token_pair(&mut txn, &user).await?;
        txn.commit().await.map_err(DbError::from)?;

        Ok(pair)
    }

    /// Consume a verification token and mark the user's email verified.
    #[instrument(skip(self, raw_token), err)]
    pub async fn verify_email(&self, raw_token: &str) -> Result<MessageResponse> {
        let mut txn = self.state.db.begin().await.map_err(DbError::from)?;

        let token = self
            .consume_token(&mut txn, raw_token, TokenType::EmailVerification)
            .await?;

        let mut users = Users::new(&mut txn);
        users.mark_email_verified(token.user_id).await?;
        let user = users.get_by_id(token.user_id).await?.ok_or(AuthError::UserNotFound)?;

        txn.commit().await.map_err(DbError::from)?;

        self.state.mailer.enqueue(EmailRequest {
            to: user.email,
            template: EmailTemplate::Welcome { name: user.name },
        });

        Ok(MessageResponse {
            message: "Email address verified successfully.".to_string(),
        })
    }

    /// Issue a fresh verification token and send it again.
    ///
    /// Unlike the other email-sending flows this one awaits delivery, because
    /// the email is the whole point of the request.
    #[instrument(skip(self, email), err)]
    pub async fn resend_verification_email(&self, email: &str) -> Result<MessageResponse> {
        let mut txn = self.state.db.begin().await.map_err(DbError::from)?;

        let user = Users::new(&mut txn)
            .get_user_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if user.email_verified {
            return Err(AuthError::EmailAlreadyVerified.into());
        }

        let token = self
            .issue_verification_token(&mut txn, user.id, TokenType::EmailVerification)
            .await?;

        txn.commit().await.map_err(DbError::from)?;

        self.state
            .mailer
            .send_now(EmailRequest {
                to: user.email,
                template: EmailTemplate::VerifyEmail {
                    name: user.name,
                    token: token.token,
                },
            })
            .await?;

        Ok(MessageResponse {
            message: "Verification email sent.".to_string(),
        })
    }

    /// Start a password reset. Always returns the same neutral message, so the
    /// response does not reveal whether the email is registered.
    #[instrument(skip(self, email))]
    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse> {
        let neutral = MessageResponse {
            message: "If an account with that email exists, a password reset link has been sent.".to_string(),
        };

        let mut txn = self.state.db.begin().await.map_err(DbError::from)?;

        let Some(user) = Users::new(&mut txn).get_user_by_email(email).await? else {
            return Ok(neutral);
        };

        let token = self
            .issue_verification_token(&mut txn, user.id, TokenType::PasswordReset)
            .await?;

        txn.commit().await.map_err(DbError::from)?;

        self.state.mailer.enqueue(EmailRequest {
            to: user.email,
            template: EmailTemplate::ForgotPassword {
                name: user.name,
                token: token.token,
            },
        });

        Ok(neutral)
    }

    /// Consume a reset token and set the new password.
    ///
    /// All of the user's refresh tokens are revoked, so stolen sessions do not
    /// survive a password reset.
    #[instrument(skip(self, raw_token, new_password), err)]
    pub async fn reset_password(&self, raw_token: &str, new_password: String) -> Result<MessageResponse> {
        self.validate_password(&new_password)?;

        let mut txn = self.state.db.begin().await.map_err(DbError::from)?;

        let token = self.consume_token(&mut txn, raw_token, TokenType::PasswordReset).await?;

        let password_hash = self.hash_password(new_password).await?;

        let mut users = Users::new(&mut txn);
        let user = users.get_by_id(token.user_id).await?.ok_or(AuthError::UserNotFound)?;
        users.update_password(user.id, &password_hash).await?;

        RefreshTokens::new(&mut txn).revoke_all_for_user(user.id).await?;

        txn.commit().await.map_err(DbError::from)?;

        self.state.mailer.enqueue(EmailRequest {
            to: user.email,
            template: EmailTemplate::PasswordReset { name: user.name },
        });

        Ok(MessageResponse {
            message: "Password has been reset successfully.".to_string(),
        })
    }

    /// Revoke the presented refresh token.
    ///
    /// Unknown or already revoked tokens are treated as success: the caller's
    /// goal is that the token no longer works, and it doesn't.
    #[instrument(skip(self, refresh_token), err)]
    pub async fn logout(&self, refresh_token: &str) -> Result<MessageResponse> {
        let mut conn = self.state.db.acquire().await.map_err(DbError::from)?;
        let mut tokens = RefreshTokens::new(&mut conn);

        if let Some(token) = tokens.find_by_token(refresh_token).await? {
            tokens.revoke(token.id).await?;
        }

        Ok(MessageResponse {
            message: "Logged out successfully.".to_string(),
        })
    }

    /// Create a signed access token plus a stored opaque refresh token.
    async fn issue_token_pair(
        &self,
        conn: &mut sqlx::PgConnection,
        user: &UserDBResponse,
    ) -> Result<TokenPairResponse> {
        let config = &self.state.config;

        let access_token = tokens::create_access_token(user.id, user.role, config)?;

        let refresh_token = RefreshTokens::new(conn)
            .create(&RefreshTokenCreateRequest {
                user_id: user.id,
                token: password::generate_opaque_token(),
                expires_at: Utc::now() + config.auth.security.refresh_token_ttl,
            })
            .await?;

        Ok(TokenPairResponse {
            access_token,
            refresh_token: refresh_token.token,
            expires_in: config.auth.security.access_token_ttl.as_secs(),
            user: user.clone().into(),
        })
    }

    /// Replace any outstanding token of this type for the user and issue a new
    /// one, so at most one actionable token exists per (user, type).
    async fn issue_verification_token(
        &self,
        conn: &mut sqlx::PgConnection,
        user_id: crate::types::UserId,
        token_type: TokenType,
    ) -> Result<VerificationToken> {
        let native = &self.state.config.auth.native;
        let ttl = match token_type {
            TokenType::EmailVerification => native.verification_token_ttl,
            TokenType::PasswordReset => native.reset_token_ttl,
        };

        let mut tokens = VerificationTokens::new(conn);
        tokens.delete_for_user(user_id, token_type).await?;
        let token = tokens
            .create(&VerificationTokenCreateRequest {
                user_id,
                token_type,
                expires_at: Utc::now() + ttl,
            })
            .await?;

        Ok(token)
    }

    /// Look up a single-use token and mark it used.
    ///
    /// Checks run in a fixed order: unknown or wrong-type first, then already
    /// used, then expired. A token that is both used and expired reports as
    /// used.
    async fn consume_token(
        &self,
        conn: &mut sqlx::PgConnection,
        raw_token: &str,
        expected_type: TokenType,
    ) -> Result<VerificationToken> {
        let invalid: Error = match expected_type {
            TokenType::EmailVerification => AuthError::VerificationTokenInvalid.into(),
            TokenType::PasswordReset => AuthError::ResetTokenInvalid.into(),
        };

        let mut tokens = VerificationTokens::new(conn);

        let token = match tokens.find_by_token(raw_token).await? {
            Some(token) if token.token_type == expected_type => token,
            _ => return Err(invalid),
        };

        if token.used {
            return Err(match expected_type {
                TokenType::EmailVerification => AuthError::VerificationTokenInvalid.into(),
                TokenType::PasswordReset => AuthError::ResetTokenAlreadyUsed.into(),
            });
        }

        if token.is_expired() {
            return Err(match expected_type {
                TokenType::EmailVerification => AuthError::VerificationTokenExpired.into(),
                TokenType::PasswordReset => AuthError::ResetTokenExpired.into(),
            });
        }

        tokens.mark_used(token.id).await?;
        Ok(token)
    }

    fn validate_password(&self, password: &str) -> Result<()> {
        let policy = &self.state.config.auth.native.password;

        if password.len() < policy.min_length {
            return Err(Error::BadRequest {
                message: format!("Password must be at least {} characters long", policy.min_length),
            });
        }
        if password.len() > policy.max_length {
            return Err(Error::BadRequest {
                message: format!("Password must be at most {} characters long", policy.max_length),
            });
        }

        Ok(())
    }

    /// Argon2 hashing is CPU-bound, so it runs off the async runtime.
    async fn hash_password(&self, password: String) -> Result<String> {
        let params = self.state.config.auth.native.password.argon2_params();
        tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("join password hash task: {e}"),
            })?
    }
}
