//! Extractor for the authenticated user in request handlers.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::tokens,
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{instrument, trace};

/// Extract user from a Bearer access token if present and valid
/// Returns:
/// - None: No Authorization header or not a Bearer token
/// - Some(Ok(user)): Valid access token found and verified
/// - Some(Err(error)): Bearer token present but invalid/expired
#[instrument(skip(parts, config))]
fn try_bearer_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let token = auth_str.strip_prefix("Bearer ")?;

    Some(tokens::verify_access_token(token, config))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_bearer_auth(parts, &state.config) {
            Some(Ok(user)) => Ok(user),
            Some(Err(e)) => {
                trace!("Bearer authentication failed: {:?}", e);
                Err(Error::Unauthenticated { message: None })
            }
            None => {
                trace!("No authentication credentials found in request");
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}

/// Reject callers that do not hold the admin role
pub fn require_admin(user: &CurrentUser) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            action: "manage".to_string(),
            resource: "users".to_string(),
        })
    }
}
