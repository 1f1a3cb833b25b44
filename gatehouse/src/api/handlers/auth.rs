//! Authentication endpoints.
//!
//! Handlers here stay thin: request extraction, a call into
//! [`AuthFlows`](crate::auth::flows::AuthFlows), response shaping. All the
//! interesting rules live in the flows module.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::auth::{
        ForgotPasswordRequest, LoginRequest, LogoutRequest, MessageResponse, RefreshRequest, RegisterRequest,
        ResendVerificationRequest, ResetPasswordRequest, TokenPairResponse,
    },
    auth::flows::AuthFlows,
    errors::Error,
};

/// Register a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "Account created, verification email sent", body = MessageResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "Email already registered"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), Error> {
    let response = AuthFlows::new(&state).register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Log in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Access and refresh tokens issued", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials or email not verified"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, Error> {
    let response = AuthFlows::new(&state).login(request).await?;
    Ok(Json(response))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "New token pair issued, old refresh token revoked", body = TokenPairResponse),
        (status = 401, description = "Refresh token invalid, revoked, or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, Error> {
    let response = AuthFlows::new(&state).refresh(request).await?;
    Ok(Json(response))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let response = AuthFlows::new(&state).logout(&request.refresh_token).await?;
    Ok(Json(response))
}

/// Verify an email address using a token from the verification email
#[utoipa::path(
    get,
    path = "/auth/verify-email/{token}",
    params(("token" = String, Path, description = "Verification token from the email link")),
    tag = "authentication",
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Token invalid, already used, or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let response = AuthFlows::new(&state).verify_email(&token).await?;
    Ok(Json(response))
}

/// Send a fresh verification email
#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    request_body = ResendVerificationRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Verification email sent", body = MessageResponse),
        (status = 400, description = "Email already verified"),
        (status = 404, description = "No account with this email"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let response = AuthFlows::new(&state).resend_verification_email(&request.email).await?;
    Ok(Json(response))
}

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Neutral acknowledgement, sent whether or not the account exists", body = MessageResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let response = AuthFlows::new(&state).forgot_password(&request.email).await?;
    Ok(Json(response))
}

/// Set a new password using a token from the reset email
#[utoipa::path(
    post,
    path = "/auth/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the email link")),
    request_body = ResetPasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password reset, all sessions revoked", body = MessageResponse),
        (status = 400, description = "Token invalid, already used, or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let response = AuthFlows::new(&state).reset_password(&token, request.new_password).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::api::models::auth::TokenPairResponse;
    use crate::build_router;
    use crate::db::models::verification_tokens::TokenType;
    use crate::test_utils::{create_test_config, create_test_state, stored_token};
    use axum_test::TestServer;
    use serde_json::json;
    use sqlx::PgPool;

    async fn test_server(pool: PgPool) -> (TestServer, PgPool) {
        let state = create_test_state(pool.clone(), create_test_config());
        let server = TestServer::new(build_router(state)).unwrap();
        (server, pool)
    }

    async fn register(server: &TestServer, email: &str) {
        server
            .post("/api/v1/auth/register")
            .json(&json!({
                "name": "Test User",
                "email": email,
                "password": "correct-horse-battery",
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    async fn register_and_verify(server: &TestServer, pool: &PgPool, email: &str) {
        register(server, email).await;
        let token = stored_token(pool, email, TokenType::EmailVerification).await;
        server.get(&format!("/api/v1/auth/verify-email/{token}")).await.assert_status_ok();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_register_login_flow(pool: PgPool) {
        let (server, pool) = test_server(pool).await;

        register(&server, "flow@example.com").await;

        // Login before verification is rejected
        let response = server
            .post("/api/v1/auth/login")
            .json(&json!({"email": "flow@example.com", "password": "correct-horse-battery"}))
            .await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

        let token = stored_token(&pool, "flow@example.com", TokenType::EmailVerification).await;
        server.get(&format!("/api/v1/auth/verify-email/{token}")).await.assert_status_ok();

        let response = server
            .post("/api/v1/auth/login")
            .json(&json!({"email": "flow@example.com", "password": "correct-horse-battery"}))
            .await;
        response.assert_status_ok();
        let pair: TokenPairResponse = response.json();
        assert_eq!(pair.user.email, "flow@example.com");
        assert!(pair.user.email_verified);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_register_duplicate_is_conflict(pool: PgPool) {
        let (server, _pool) = test_server(pool).await;

        register(&server, "taken@example.com").await;

        let response = server
            .post("/api/v1/auth/register")
            .json(&json!({
                "name": "Other",
                "email": "taken@example.com",
                "password": "another-password-1",
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CONFLICT);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_refresh_and_logout(pool: PgPool) {
        let (server, pool) = test_server(pool).await;
        register_and_verify(&server, &pool, "session@example.com").await;

        let pair: TokenPairResponse = server
            .post("/api/v1/auth/login")
            .json(&json!({"email": "session@example.com", "password": "correct-horse-battery"}))
            .await
            .json();

        let response = server
            .post("/api/v1/auth/refresh")
            .json(&json!({"refresh_token": pair.refresh_token}))
            .await;
        response.assert_status_ok();
        let rotated: TokenPairResponse = response.json();

        // The old refresh token is now dead
        server
            .post("/api/v1/auth/refresh")
            .json(&json!({"refresh_token": pair.refresh_token}))
            .await
            .assert_status(axum::http::StatusCode::UNAUTHORIZED);

        // Logout kills the rotated token; repeating it is still 200
        server
            .post("/api/v1/auth/logout")
            .json(&json!({"refresh_token": rotated.refresh_token}))
            .await
            .assert_status_ok();
        server
            .post("/api/v1/auth/logout")
            .json(&json!({"refresh_token": rotated.refresh_token}))
            .await
            .assert_status_ok();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_forgot_password_is_neutral_over_http(pool: PgPool) {
        let (server, pool) = test_server(pool).await;
        register_and_verify(&server, &pool, "real@example.com").await;

        let known = server
            .post("/api/v1/auth/forgot-password")
            .json(&json!({"email": "real@example.com"}))
            .await;
        known.assert_status_ok();

        let unknown = server
            .post("/api/v1/auth/forgot-password")
            .json(&json!({"email": "fake@example.com"}))
            .await;
        unknown.assert_status_ok();

        assert_eq!(known.text(), unknown.text());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_reset_password_over_http(pool: PgPool) {
        let (server, pool) = test_server(pool).await;
        register_and_verify(&server, &pool, "httpreset@example.com").await;

        server
            .post("/api/v1/auth/forgot-password")
            .json(&json!({"email": "httpreset@example.com"}))
            .await
            .assert_status_ok();

        let token = stored_token(&pool, "httpreset@example.com", TokenType::PasswordReset).await;
        server
            .post(&format!("/api/v1/auth/reset-password/{token}"))
            .json(&json!({"new_password": "fresh-password-123"}))
            .await
            .assert_status_ok();

        // New password works
        server
            .post("/api/v1/auth/login")
            .json(&json!({"email": "httpreset@example.com", "password": "fresh-password-123"}))
            .await
            .assert_status_ok();

        // Reusing the token is a 400
        server
            .post(&format!("/api/v1/auth/reset-password/{token}"))
            .json(&json!({"new_password": "yet-another-pass-1"}))
            .await
            .assert_status(axum::http::StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn test_verify_email_bad_token(pool: PgPool) {
        let (server, _pool) = test_server(pool).await;

        server
            .get("/api/v1/auth/verify-email/not-a-real-token")
            .await
            .assert_status(axum::http::StatusCode::BAD_REQUEST);
    }
}
