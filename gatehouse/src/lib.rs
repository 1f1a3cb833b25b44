//! # gatehouse: Authentication and Account Management Backend
//!
//! `gatehouse` is a self-hostable backend for user authentication and account
//! management. It provides a RESTful API for registration with email
//! verification, credential login, refresh token rotation, password reset, and
//! role-based user administration.
//!
//! ## Overview
//!
//! `gatehouse` sits in front of an application that needs accounts but does not
//! want to own the mechanics of credential storage, token lifecycles, and
//! verification emails. Clients authenticate once with an email and password
//! and then hold a short-lived JWT access token plus a long-lived opaque
//! refresh token. The access token travels on every request as a Bearer header;
//! the refresh token is exchanged at `/auth/refresh` for a new pair, with the
//! presented token revoked in the same step so a stolen refresh token races its
//! owner and loses.
//!
//! ### What It Does
//!
//! New accounts start unverified: registration stores an Argon2id password hash
//! and emails a single-use verification link, and login is refused until that
//! link is followed. Password resets work the same way in reverse, with a
//! shorter-lived single-use token that also revokes every outstanding session
//! when redeemed. A small admin API manages users directly, bypassing the
//! verification dance for provisioned accounts.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the
//! HTTP layer and uses PostgreSQL for all persistence.
//!
//! The **API layer** ([`api`]) exposes the REST surface under `/api/v1`:
//! authentication flows at `/api/v1/auth/*` and user management at
//! `/api/v1/users/*`, with interactive OpenAPI documentation at `/docs`.
//!
//! The **authentication layer** ([`auth`]) owns the account flows themselves:
//! password hashing, JWT issuance and verification, the request extractor for
//! the authenticated user, and the flow engine that strings repositories and
//! the mailer together.
//!
//! The **database layer** ([`db`]) uses the repository pattern to abstract data
//! access, with one repository per table (users, verification tokens, refresh
//! tokens).
//!
//! **Background services**: a single email delivery worker drains a queue of
//! outgoing notifications so SMTP latency never blocks request handlers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use gatehouse::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = gatehouse::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     gatehouse::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! The application requires a PostgreSQL database and automatically runs
//! migrations on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
//! gatehouse::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
mod openapi;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::users::Role,
    auth::password,
    config::CorsOrigin,
    db::handlers::{Repository, Users},
    db::models::users::UserCreateDBRequest,
    email::{EmailService, Mailer},
    openapi::ApiDoc,
};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, patch, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{TokenId, UserId};

/// Application state shared across all request handlers.
///
/// - `db`: PostgreSQL connection pool
/// - `config`: Application configuration loaded from file/environment
/// - `mailer`: Handle for queueing and sending emails
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub mailer: Mailer,
}

/// Get the gatehouse database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: creates the admin account on first startup, or updates its
/// password on later startups if one is configured. Admin accounts are created
/// pre-verified.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, password: Option<&str>, db: &PgPool) -> anyhow::Result<UserId> {
    let password_hash = match password {
        Some(pwd) => Some(password::hash_string(pwd).map_err(|e| anyhow::anyhow!("hash admin password: {e}"))?),
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut users = Users::new(&mut tx);

    if let Some(existing) = users.get_user_by_email(email).await? {
        if let Some(password_hash) = password_hash {
            users.update_password(existing.id, &password_hash).await?;
        }
        tx.commit().await?;
        return Ok(existing.id);
    }

    let Some(password_hash) = password_hash else {
        anyhow::bail!("admin_password is required to create the initial admin user");
    };

    let created = users
        .create(&UserCreateDBRequest {
            name: "Admin".to_string(),
            email: email.to_string(),
            password_hash,
            role: Role::Admin,
            email_verified: true,
        })
        .await?;

    tx.commit().await?;
    info!("Created initial admin user");
    Ok(created.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .auth
        .security
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            let value = match origin {
                CorsOrigin::Wildcard => "*".parse::<HeaderValue>(),
                CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>(),
            };
            match value {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Skipping unusable CORS origin: {e}");
                    None
                }
            }
        })
        .collect();

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .allow_headers([axum::http::header::AUTHORIZATION, axum::http::header::CONTENT_TYPE])
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    cors
}

/// Build the application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(api::handlers::auth::register))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/refresh", post(api::handlers::auth::refresh))
        .route("/auth/logout", post(api::handlers::auth::logout))
        .route("/auth/verify-email/{token}", get(api::handlers::auth::verify_email))
        .route("/auth/resend-verification", post(api::handlers::auth::resend_verification))
        .route("/auth/forgot-password", post(api::handlers::auth::forgot_password))
        .route("/auth/reset-password/{token}", post(api::handlers::auth::reset_password));

    let user_routes = Router::new()
        .route("/users", get(api::handlers::users::list_users))
        .route("/users", post(api::handlers::users::create_user))
        .route("/users/me", get(api::handlers::users::get_current_user))
        .route("/users/me", patch(api::handlers::users::update_current_user))
        .route("/users/{id}", get(api::handlers::users::get_user))
        .route("/users/{id}", patch(api::handlers::users::update_user))
        .route("/users/{id}", delete(api::handlers::users::delete_user));

    let cors_layer = create_cors_layer(&state.config);

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", auth_routes.merge(user_routes))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state(state)
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Background tasks that run alongside the HTTP server.
///
/// Currently just the email delivery worker. The shutdown token signals the
/// worker to drain its queue and stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs
///    migrations, creates the initial admin user, and starts the email worker
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles
///    requests until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting gatehouse with configuration: {:#?}", config);

        let Some(database_url) = config.database.url.clone() else {
            anyhow::bail!("No database URL configured. Set DATABASE_URL or database.url in the config file.");
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(config.database.acquire_timeout)
            .connect(&database_url)
            .await?;
        migrator().run(&pool).await?;

        create_initial_admin_user(&config.admin_email, config.admin_password.as_deref(), &pool).await?;

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let email_service = EmailService::new(&config).map_err(|e| anyhow::anyhow!("initialize email service: {e}"))?;
        let (mailer, email_worker) = Mailer::spawn(email_service, shutdown_token.clone());

        let bg_services = BackgroundServices {
            background_tasks: vec![email_worker],
            shutdown_token,
        };

        let state = AppState::builder().db(pool.clone()).config(config.clone()).mailer(mailer).build();
        let router = build_router(state);

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Gatehouse listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Let the email worker drain its queue before closing the pool
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
