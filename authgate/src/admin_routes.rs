//! Administrative user management, served only on the mTLS listener.
//!
//! There is no bearer middleware here: the verified client certificate is
//! the authentication. The operations mirror what a trusted backend needs:
//! full CRUD over users plus the opaque per-user `data` blob and a
//! server-side password check.

use std::sync::Arc;

use authgate_api::error::{ApiError, Created};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    app::AppState,
    auth_routes::{ensure_email_available, hash_password, parse, store_error},
    models::{User, UserId},
    password,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", get(get_one).delete(delete_one))
        .route("/{id}/email", put(set_email))
        .route("/{id}/password", put(set_password))
        .route("/{id}/enable", put(enable))
        .route("/{id}/disable", put(disable))
        .route("/{id}/data", get(get_data).put(set_data))
        .route("/{id}/checkpw", post(check_password))
        .fallback(not_found)
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

// --- request / response types --- //

#[derive(Deserialize, Validate)]
struct CreateUserRequest {
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 32))]
    password: String,
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize, Validate)]
struct SetEmailRequest {
    #[validate(email)]
    email: String,
}

#[derive(Deserialize, Validate)]
struct SetPasswordRequest {
    #[validate(length(min = 8, max = 32))]
    password: String,
}

#[derive(Serialize)]
struct BoolResult {
    result: bool,
}

/// The administrative view of a user. The password hash and the encrypted
/// TOTP secret never leave the process.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminUserResponse {
    id: UserId,
    email: String,
    confirmed: bool,
    enabled: bool,
    otp_enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    create_date: OffsetDateTime,
    data: serde_json::Value,
}

impl From<User> for AdminUserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            confirmed: user.confirmed,
            enabled: user.enabled,
            otp_enabled: user.otp_enabled,
            create_date: user.create_date,
            data: user.data,
        }
    }
}

// --- handlers --- //

async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Created, ApiError> {
    let data = parse(body)?;
    // Same invariants as public signup: no collision with an existing
    // address or an in-flight email change.
    ensure_email_available(&state, &data.email).await?;

    let password_hash = hash_password(&state, &data.password)?;
    let user = state
        .users
        .create(
            data.email.clone(),
            password_hash,
            data.confirmed,
            data.enabled,
            data.data,
        )
        .await
        .map_err(store_error)?;
    info!("Admin created user {}", user.id);
    Ok(Created(user.id.to_string()))
}

async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AdminUserResponse>, ApiError> {
    let user = user_by_id(&state, &id).await?;
    Ok(Json(AdminUserResponse::from(user)))
}

async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = user_by_id(&state, &id).await?;
    state.users.delete(&user).await.map_err(store_error)?;
    info!("Admin deleted user {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn set_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<SetEmailRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let mut user = user_by_id(&state, &id).await?;
    let data = parse(body)?;
    user.email = data.email;
    // The store's unique index maps a collision to 409.
    state.users.update(&user).await.map_err(store_error)?;
    info!("Admin changed email for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn set_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<SetPasswordRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let mut user = user_by_id(&state, &id).await?;
    let data = parse(body)?;
    user.password_hash = hash_password(&state, &data.password)?;
    state.users.update(&user).await.map_err(store_error)?;
    info!("Admin changed password for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn enable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    set_enabled(&state, &id, true).await
}

async fn disable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    set_enabled(&state, &id, false).await
}

async fn get_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = user_by_id(&state, &id).await?;
    Ok(Json(user.data))
}

async fn set_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let mut user = user_by_id(&state, &id).await?;
    let Json(data) = body.map_err(|rejection| {
        ApiError::bad_request(format!("invalid request body: {rejection}"))
    })?;
    user.data = data;
    state.users.update(&user).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<SetPasswordRequest>, JsonRejection>,
) -> Result<Json<BoolResult>, ApiError> {
    let user = user_by_id(&state, &id).await?;
    let data = parse(body)?;
    Ok(Json(BoolResult {
        result: password::verify_password(&user.password_hash, &data.password),
    }))
}

// --- helpers --- //

async fn user_by_id(state: &AppState, id: &str) -> Result<User, ApiError> {
    let user = state
        .users
        .get(&UserId::from(id))
        .await
        .map_err(store_error)?;
    user.ok_or_else(|| {
        warn!("Admin request for unknown user {id}");
        ApiError::not_found()
    })
}

async fn set_enabled(
    state: &AppState,
    id: &str,
    enabled: bool,
) -> Result<StatusCode, ApiError> {
    let mut user = user_by_id(state, id).await?;
    user.enabled = enabled;
    state.users.update(&user).await.map_err(store_error)?;
    info!("Admin set enabled={enabled} for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}
