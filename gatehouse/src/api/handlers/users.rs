//! User management endpoints.
//!
//! Everything except `/users/me` and fetching your own record requires the
//! admin role.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::users::{CurrentUser, ListUsersQuery, UserCreate, UserResponse, UserSelfUpdate, UserUpdate},
    auth::{current_user::require_admin, password},
    db::{
        errors::DbError,
        handlers::{Repository, Users, users::UserFilter},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::{AuthError, Error},
    types::UserId,
};

/// List all users
#[utoipa::path(
    get,
    path = "/users",
    params(ListUsersQuery),
    tag = "users",
    responses(
        (status = 200, description = "List of users", body = Vec<UserResponse>),
        (status = 403, description = "Admin role required"),
    )
)]
#[tracing::instrument(skip(state, current_user))]
pub async fn list_users(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<UserResponse>>, Error> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let users = Users::new(&mut conn)
        .list(&UserFilter::new(query.pagination.skip, query.pagination.limit))
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Create a user
///
/// Admin-created accounts skip email verification.
#[utoipa::path(
    post,
    path = "/users",
    request_body = UserCreate,
    tag = "users",
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "Email already registered"),
    )
)]
#[tracing::instrument(skip(state, current_user, request))]
pub async fn create_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>), Error> {
    require_admin(&current_user)?;

    let password = request.password.clone();
    let params = state.config.auth.native.password.argon2_params();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password hash task: {e}"),
        })??;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut db_request = UserCreateDBRequest::from_api(request, password_hash);
    db_request.email_verified = true;

    let user = match Users::new(&mut conn).create(&db_request).await {
        Ok(user) => user,
        Err(DbError::UniqueViolation { .. }) => return Err(AuthError::EmailAlreadyExists.into()),
        Err(e) => return Err(e.into()),
    };

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Get the authenticated user's own record
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    responses(
        (status = 200, description = "The authenticated user", body = UserResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip(state, current_user))]
pub async fn get_current_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    Ok(Json(user.into()))
}

/// Update the authenticated user's own profile
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UserSelfUpdate,
    tag = "users",
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip(state, current_user, request))]
pub async fn update_current_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UserSelfUpdate>,
) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = match Users::new(&mut conn)
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                name: request.name,
                role: None,
                password_hash: None,
            },
        )
        .await
    {
        Ok(user) => user,
        Err(DbError::NotFound) => return Err(AuthError::UserNotFound.into()),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(user.into()))
}

/// Get a user by id
///
/// Users can fetch their own record; any other record requires admin.
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ID")),
    tag = "users",
    responses(
        (status = 200, description = "The user", body = UserResponse),
        (status = 403, description = "Admin role required for other users"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip(state, current_user))]
pub async fn get_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<UserId>,
) -> Result<Json<UserResponse>, Error> {
    if id != current_user.id {
        require_admin(&current_user)?;
    }

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn).get_by_id(id).await?.ok_or(AuthError::UserNotFound)?;

    Ok(Json(user.into()))
}

/// Update a user's name or role
#[utoipa::path(
    patch,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ID")),
    request_body = UserUpdate,
    tag = "users",
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip(state, current_user, request))]
pub async fn update_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<UserId>,
    Json(request): Json<UserUpdate>,
) -> Result<Json<UserResponse>, Error> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = match Users::new(&mut conn)
        .update(
            id,
            &UserUpdateDBRequest {
                name: request.name,
                role: request.role,
                password_hash: None,
            },
        )
        .await
    {
        Ok(user) => user,
        Err(DbError::NotFound) => return Err(AuthError::UserNotFound.into()),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(user.into()))
}

/// Delete a user
///
/// Admins cannot delete their own account; refresh tokens and outstanding
/// verification tokens go with the user via foreign key cascade.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ID")),
    tag = "users",
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete own account"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip(state, current_user))]
pub async fn delete_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<UserId>,
) -> Result<StatusCode, Error> {
    require_admin(&current_user)?;

    if id == current_user.id {
        return Err(Error::BadRequest {
            message: "Cannot delete your own account".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    if !Users::new(&mut conn).delete(id).await? {
        return Err(AuthError::UserNotFound.into());
    }

    Ok(StatusCode::NO_CONTENT)
}
