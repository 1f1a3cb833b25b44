//! OpenAPI documentation configuration.
//!
//! The generated spec covers the full API surface under `/api/v1` and is
//! served interactively at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Bearer access token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "JWT access token obtained from `/auth/login` or `/auth/refresh`. \
                             Include it in the `Authorization` header:\n\n\
                             ```\nAuthorization: Bearer YOUR_ACCESS_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::refresh,
        api::handlers::auth::logout,
        api::handlers::auth::verify_email,
        api::handlers::auth::resend_verification,
        api::handlers::auth::forgot_password,
        api::handlers::auth::reset_password,
        api::handlers::users::list_users,
        api::handlers::users::create_user,
        api::handlers::users::get_current_user,
        api::handlers::users::update_current_user,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "authentication", description = "Registration, login, tokens, email verification, password reset"),
        (name = "users", description = "User management"),
    ),
    info(
        title = "Gatehouse API",
        description = "Self-hostable authentication and account-management backend",
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_includes_all_routes() {
        let spec = ApiDoc::openapi();
        let paths: Vec<&String> = spec.paths.paths.keys().collect();

        for expected in [
            "/auth/register",
            "/auth/login",
            "/auth/refresh",
            "/auth/logout",
            "/auth/verify-email/{token}",
            "/auth/resend-verification",
            "/auth/forgot-password",
            "/auth/reset-password/{token}",
            "/users",
            "/users/me",
            "/users/{id}",
        ] {
            assert!(paths.iter().any(|p| *p == expected), "missing path {expected}");
        }
    }
}
