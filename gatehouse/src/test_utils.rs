//! Shared helpers for the test suites.

use crate::api::models::users::Role;
use crate::config::{Config, EmailTransportConfig, NativeAuthConfig, PasswordConfig};
use crate::db::models::users::UserCreateDBRequest;
use crate::db::models::verification_tokens::TokenType;
use crate::email::{EmailService, Mailer};
use crate::{AppState, UserId};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("gatehouse-test-emails-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&temp_dir);

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: crate::config::AuthConfig {
            native: NativeAuthConfig {
                enabled: true,
                allow_registration: true,
                // Cheap hashing parameters so registration-heavy tests stay fast
                password: PasswordConfig {
                    argon2_memory_kib: 8192,
                    argon2_iterations: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
            security: crate::config::SecurityConfig::default(),
        },
        email: crate::config::EmailConfig {
            transport: EmailTransportConfig::File {
                path: temp_dir.to_string_lossy().to_string(),
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn create_test_state(pool: PgPool, config: Config) -> AppState {
    let service = EmailService::new(&config).expect("Failed to create email service");
    let (mailer, _worker) = Mailer::spawn(service, CancellationToken::new());

    AppState::builder().db(pool).config(config).mailer(mailer).build()
}

pub fn test_user_create_request(email: &str) -> UserCreateDBRequest {
    UserCreateDBRequest {
        name: format!("Test User {}", Uuid::new_v4().simple()),
        email: email.to_string(),
        // Not a usable credential, direct inserts bypass the login path
        password_hash: "$argon2id$v=19$m=8192,t=1,p=1$c29tZXNhbHQ$bm90LWEtcmVhbC1oYXNo".to_string(),
        role: Role::User,
        email_verified: false,
    }
}

/// Fetch the most recent stored verification token for a user, as the email
/// link would carry it.
pub async fn stored_token(pool: &PgPool, email: &str, token_type: TokenType) -> String {
    let user_id: UserId = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("Failed to look up user for token");

    sqlx::query_scalar(
        "SELECT token FROM verification_tokens WHERE user_id = $1 AND token_type = $2 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(token_type.as_str())
    .fetch_one(pool)
    .await
    .expect("Failed to fetch stored token")
}
