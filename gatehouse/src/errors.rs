use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Authentication flow failures.
///
/// These are the outcomes of credential checks and token lifecycle operations
/// that callers are expected to handle. Every variant carries a message that is
/// safe to return to the client.
#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("An account with this email address already exists")]
    EmailAlreadyExists,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Please verify your email address before logging in")]
    EmailNotVerified,

    #[error("Email address is already verified")]
    EmailAlreadyVerified,

    /// Refresh token is unknown, revoked, or lost a rotation race
    #[error("Refresh token is invalid or has been revoked")]
    RefreshRevoked,

    #[error("Refresh token has expired")]
    TokenExpired,

    #[error("User not found")]
    UserNotFound,

    /// Verification token is unknown, of the wrong type, or already used
    #[error("Invalid or already used verification token")]
    VerificationTokenInvalid,

    #[error("Verification token has expired")]
    VerificationTokenExpired,

    #[error("Invalid password reset token")]
    ResetTokenInvalid,

    #[error("Password reset token has already been used")]
    ResetTokenAlreadyUsed,

    #[error("Password reset token has expired")]
    ResetTokenExpired,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::EmailAlreadyExists => StatusCode::CONFLICT,
            AuthError::InvalidCredentials
            | AuthError::EmailNotVerified
            | AuthError::RefreshRevoked
            | AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::EmailAlreadyVerified
            | AuthError::VerificationTokenInvalid
            | AuthError::VerificationTokenExpired
            | AuthError::ResetTokenInvalid
            | AuthError::ResetTokenAlreadyUsed
            | AuthError::ResetTokenExpired => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// User lacks required permissions for the operation
    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions { action: String, resource: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Authentication flow failure with a well-defined client outcome
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Auth(auth_err) => auth_err.status_code(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Auth(auth_err) => auth_err.to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => {
                    match (table.as_deref(), constraint.as_deref()) {
                        (Some("users"), Some(c)) if c.contains("email") => {
                            "An account with this email address already exists".to_string()
                        }
                        _ => "Resource already exists".to_string(),
                    }
                }
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Auth(_) | Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let user_message = self.user_message();
        (status, user_message).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(AuthError::EmailAlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(AuthError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::EmailNotVerified.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::RefreshRevoked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::UserNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::VerificationTokenInvalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::ResetTokenAlreadyUsed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::ResetTokenExpired.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_auth_errors_share_credential_message() {
        // Unknown email and wrong password must be indistinguishable to the client
        let err = Error::from(AuthError::InvalidCredentials);
        assert_eq!(err.user_message(), "Invalid email or password");
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = Error::Internal {
            operation: "connect to smtp relay at 10.0.0.3".to_string(),
        };
        assert_eq!(err.user_message(), "Internal server error");
    }
}
