//! The public authentication endpoints, mounted under the configured API
//! prefix (default `/auth/`).
//!
//! Everything here sits behind the gate; the gate's whitelist keeps
//! `login`, `signup`, `confirm/`, and `initpwreset` reachable without a
//! credential. Conditional endpoints are only mounted when their feature
//! flag is set, and unknown paths under the prefix are 404 rather than
//! being forwarded upstream.

use std::sync::Arc;

use authgate_api::error::{ApiError, Created};
use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use totp_rs::{Secret, TOTP};
use tracing::{info, warn};
use validator::Validate;

use crate::{
    app::AppState,
    config::Config,
    gate::AuthedUser,
    models::{PendingActionType, User, UserId},
    password,
    store::StoreError,
};

pub fn router(config: &Config) -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/ping", get(ping))
        .route("/confirm/{token}", post(confirm));
    if config.allow_signup {
        router = router.route("/signup", post(signup));
    }
    if config.allow_change_password {
        router = router.route("/setpw", post(set_password));
    }
    if config.allow_change_email {
        router = router.route("/changeemail", post(change_email));
    }
    if config.allow_forgot_password {
        router = router.route("/initpwreset", post(init_password_reset));
    }
    if config.allow_delete_account {
        router = router.route("/delete", post(delete_account));
    }
    if config.enable_totp {
        router = router
            .route("/otp/init", post(otp_init))
            .route("/otp/confirm", post(otp_confirm))
            .route("/otp/disable", post(otp_disable));
    }
    // Unknown paths under the auth prefix are not proxied.
    router.fallback(not_found)
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

// --- request / response types --- //

#[derive(Deserialize, Validate)]
struct LoginRequest {
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 32))]
    password: String,
    #[serde(default)]
    otp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    otp_required: bool,
    access_token: String,
    refresh_token: String,
}

impl LoginResponse {
    /// The half-open login state: password verified but a second factor is
    /// still missing or wrong. Returned as a 200 with no tokens.
    fn otp_required() -> Self {
        Self {
            otp_required: true,
            access_token: String::new(),
            refresh_token: String::new(),
        }
    }
}

#[derive(Deserialize, Validate)]
struct RefreshRequest {
    #[serde(rename = "refreshToken")]
    #[validate(length(min = 1))]
    refresh_token: String,
}

#[derive(Deserialize, Validate)]
struct SignupRequest {
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 32))]
    password: String,
}

#[derive(Deserialize, Validate)]
struct ChangePasswordRequest {
    #[serde(rename = "oldPassword")]
    #[validate(length(min = 8, max = 32))]
    old_password: String,
    #[serde(rename = "newPassword")]
    #[validate(length(min = 8, max = 32))]
    new_password: String,
}

#[derive(Deserialize, Validate)]
struct ChangeEmailRequest {
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 32))]
    password: String,
}

#[derive(Deserialize, Validate)]
struct ForgotPasswordRequest {
    #[validate(email)]
    email: String,
}

#[derive(Deserialize, Validate)]
struct DeleteAccountRequest {
    #[validate(length(min = 8, max = 32))]
    password: String,
}

#[derive(Deserialize, Validate)]
struct OtpValidateRequest {
    #[validate(length(equal = 6))]
    passcode: String,
}

#[derive(Serialize)]
struct OtpInitResponse {
    secret: String,
    /// PNG rendering of the provisioning URI, base64-encoded.
    image: String,
}

// --- handlers --- //

async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let data = parse(body)?;

    let Some(user) =
        state.users.get_by_email(&data.email).await.map_err(store_error)?
    else {
        warn!("Invalid login attempt: unknown email");
        return Err(ApiError::unauthorized());
    };
    if !user.confirmed {
        warn!("Invalid login attempt: unconfirmed account {}", user.id);
        return Err(ApiError::unauthorized());
    }
    if !user.enabled {
        warn!("Invalid login attempt: disabled account {}", user.id);
        return Err(ApiError::unauthorized());
    }
    if !password::verify_password(&user.password_hash, &data.password) {
        warn!("Invalid login attempt: wrong password for {}", user.id);
        return Err(ApiError::unauthorized());
    }

    if user.otp_enabled && state.config.enable_totp {
        let otp = data.otp.trim();
        if otp.len() != 6 {
            info!("Login for {} is missing its second factor", user.id);
            return Ok(Json(LoginResponse::otp_required()));
        }
        if !is_valid_otp(&state, &user, otp) {
            info!("Login for {} presented an invalid passcode", user.id);
            return Ok(Json(LoginResponse::otp_required()));
        }
    }

    let refresh_token = state
        .refresh_tokens
        .create(&user.id, state.config.refresh_token_lifetime)
        .await
        .map_err(store_error)?;
    let access_token = mint_access_token(&state, &user)?;
    info!("Successful login for {}", user.id);
    Ok(Json(LoginResponse {
        otp_required: false,
        access_token,
        refresh_token: refresh_token.token,
    }))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let data = parse(body)?;

    let Some(row) = state
        .refresh_tokens
        .get_by_token(&data.refresh_token)
        .await
        .map_err(store_error)?
    else {
        warn!("Refresh attempt with unknown or expired token");
        return Err(ApiError::bad_request("unknown refresh token"));
    };

    let user = authed_user(&state, &authed).await?;
    if !user.confirmed || !user.enabled {
        warn!("Refresh attempt for unusable account {}", user.id);
        return Err(ApiError::unauthorized());
    }

    // The refresh token itself is returned unchanged rather than rotated;
    // rotating it here would invalidate concurrent refreshes.
    let access_token = mint_access_token(&state, &user)?;
    info!("Refreshed access credential for {}", user.id);
    Ok(Json(LoginResponse {
        otp_required: false,
        access_token,
        refresh_token: row.token,
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let data = parse(body)?;
    let Some(row) = state
        .refresh_tokens
        .get_by_token(&data.refresh_token)
        .await
        .map_err(store_error)?
    else {
        return Err(ApiError::bad_request("unknown refresh token"));
    };
    state.refresh_tokens.delete(&row).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn signup(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Created, ApiError> {
    let data = parse(body)?;
    ensure_email_available(&state, &data.email).await?;

    let password_hash = hash_password(&state, &data.password)?;
    let user = state
        .users
        .create(
            data.email.clone(),
            password_hash,
            false,
            true,
            serde_json::Value::Null,
        )
        .await
        .map_err(store_error)?;

    let pending = state
        .pending_actions
        .create(
            &user.id,
            PendingActionType::ConfirmAccount,
            String::new(),
            state.config.pending_action_lifetime,
        )
        .await
        .map_err(store_error)?;

    match state.templates.render_signup(&user.email, &pending.token) {
        Ok(mail_body) => send_mail(&state, &user.email, mail_body).await,
        Err(err) => warn!("Could not render signup mail: {err:#}"),
    }

    info!("Created user {} awaiting confirmation", user.id);
    Ok(Created(user.id.to_string()))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    let Some(pending) = state
        .pending_actions
        .get_by_token(&token)
        .await
        .map_err(store_error)?
    else {
        return Err(ApiError::not_found());
    };
    let Some(mut user) =
        state.users.get(&pending.user_id).await.map_err(store_error)?
    else {
        return Err(ApiError::not_found());
    };
    if !user.enabled {
        return Err(ApiError::not_found());
    }

    match pending.action_type {
        PendingActionType::ConfirmAccount => {
            user.confirmed = true;
            state.users.update(&user).await.map_err(store_error)?;
            info!("Confirmed account {}", user.id);
        }
        PendingActionType::ChangeEmail => {
            user.email = pending.payload.clone();
            state.users.update(&user).await.map_err(store_error)?;
            info!("Changed email for {}", user.id);
        }
        PendingActionType::InitPasswordReset => {
            let new_password =
                password::generate_password(password::RESET_PASSWORD_LEN);
            user.password_hash = hash_password(&state, &new_password)?;
            state.users.update(&user).await.map_err(store_error)?;
            match state
                .templates
                .render_new_password(&user.email, &new_password)
            {
                Ok(mail_body) =>
                    send_mail(&state, &user.email, mail_body).await,
                Err(err) =>
                    warn!("Could not render new-password mail: {err:#}"),
            }
            info!("Reset password for {}", user.id);
        }
    }

    // The token is single-use: a second confirmation finds nothing.
    state.pending_actions.delete(&pending).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_password(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let data = parse(body)?;
    let mut user = authed_user(&state, &authed).await?;
    if !password::verify_password(&user.password_hash, &data.old_password) {
        warn!("Password change with wrong old password for {}", user.id);
        return Err(ApiError::unauthorized());
    }
    user.password_hash = hash_password(&state, &data.new_password)?;
    state.users.update(&user).await.map_err(store_error)?;
    info!("Changed password for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn change_email(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
    body: Result<Json<ChangeEmailRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let data = parse(body)?;
    let user = authed_user(&state, &authed).await?;
    if !password::verify_password(&user.password_hash, &data.password) {
        warn!("Email change with wrong password for {}", user.id);
        return Err(ApiError::unauthorized());
    }
    ensure_email_available(&state, &data.email).await?;

    let pending = state
        .pending_actions
        .create(
            &user.id,
            PendingActionType::ChangeEmail,
            data.email.clone(),
            state.config.pending_action_lifetime,
        )
        .await
        .map_err(store_error)?;

    // The confirmation goes to the proposed address: the user proves
    // control of the new mailbox, not the old one.
    match state
        .templates
        .render_change_email(&pending.payload, &pending.token)
    {
        Ok(mail_body) => send_mail(&state, &pending.payload, mail_body).await,
        Err(err) => warn!("Could not render change-email mail: {err:#}"),
    }

    info!("Created email change for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn init_password_reset(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let data = parse(body)?;
    let Some(user) =
        state.users.get_by_email(&data.email).await.map_err(store_error)?
    else {
        warn!("Password reset for unknown email");
        return Err(ApiError::bad_request("unknown email address"));
    };

    let pending = state
        .pending_actions
        .create(
            &user.id,
            PendingActionType::InitPasswordReset,
            String::new(),
            state.config.pending_action_lifetime,
        )
        .await
        .map_err(store_error)?;

    match state
        .templates
        .render_reset_password(&user.email, &pending.token)
    {
        Ok(mail_body) => send_mail(&state, &user.email, mail_body).await,
        Err(err) => warn!("Could not render reset mail: {err:#}"),
    }

    info!("Created password reset for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
    body: Result<Json<DeleteAccountRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let data = parse(body)?;
    let user = authed_user(&state, &authed).await?;
    if !password::verify_password(&user.password_hash, &data.password) {
        warn!("Account deletion with wrong password for {}", user.id);
        return Err(ApiError::unauthorized());
    }
    state.users.delete(&user).await.map_err(store_error)?;
    info!("Deleted user {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn otp_init(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
) -> Result<Json<OtpInitResponse>, ApiError> {
    let mut user = authed_user(&state, &authed).await?;
    if user.has_committed_otp() {
        return Err(ApiError::bad_request("second factor already enabled"));
    }

    let Secret::Encoded(secret) = Secret::generate_secret().to_encoded()
    else {
        return Err(ApiError::internal("TOTP secret encoding failed"));
    };
    let totp = build_totp(&state.config.totp_issuer, &user.email, &secret)?;
    let image = totp.get_qr_base64().map_err(|err| {
        ApiError::internal(format!("could not render QR code: {err}"))
    })?;

    // The secret is persisted before the user proves possession; it stays
    // inert until `otp/confirm` flips the flag. Re-running init replaces
    // any previously uncommitted secret.
    user.otp_secret = state.cipher.encrypt(&secret).map_err(|err| {
        ApiError::internal(format!("could not encrypt TOTP secret: {err}"))
    })?;
    user.otp_enabled = false;
    state.users.update(&user).await.map_err(store_error)?;

    info!("Began TOTP enrolment for {}", user.id);
    Ok(Json(OtpInitResponse { secret, image }))
}

async fn otp_confirm(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
    body: Result<Json<OtpValidateRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let data = parse(body)?;
    let mut user = authed_user(&state, &authed).await?;
    if user.otp_enabled {
        warn!("TOTP confirm for {} but already enabled", user.id);
        return Err(ApiError::bad_request("second factor already enabled"));
    }
    if user.otp_secret.trim().is_empty() {
        warn!("TOTP confirm for {} without an enrolled secret", user.id);
        return Err(ApiError::bad_request("no second factor enrolled"));
    }
    if !is_valid_otp(&state, &user, &data.passcode) {
        warn!("TOTP confirm for {} with invalid passcode", user.id);
        return Err(ApiError::bad_request("invalid passcode"));
    }

    user.otp_enabled = true;
    state.users.update(&user).await.map_err(store_error)?;
    info!("Committed TOTP enrolment for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn otp_disable(
    State(state): State<Arc<AppState>>,
    Extension(authed): Extension<AuthedUser>,
) -> Result<StatusCode, ApiError> {
    let mut user = authed_user(&state, &authed).await?;
    user.otp_secret.clear();
    user.otp_enabled = false;
    state.users.update(&user).await.map_err(store_error)?;
    info!("Disabled TOTP for {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

// --- helpers --- //

/// Deserialize and validate a JSON request body; any failure is a 400.
pub(crate) fn parse<T: Validate>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    let Json(data) = body.map_err(|rejection| {
        ApiError::bad_request(format!("invalid request body: {rejection}"))
    })?;
    data.validate()
        .map_err(|_| ApiError::bad_request("request validation failed"))?;
    Ok(data)
}

/// Map storage failures onto the HTTP status contract.
pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::DuplicateEmail =>
            ApiError::conflict("email address is already taken"),
        StoreError::UnknownUser => ApiError::not_found(),
        StoreError::Backend(msg) => ApiError::internal(msg),
    }
}

/// Load the account behind a gate-verified identity. An identity whose
/// account has vanished is a 401, not a 404.
async fn authed_user(
    state: &AppState,
    authed: &AuthedUser,
) -> Result<User, ApiError> {
    let user = state
        .users
        .get(&UserId::from(authed.user_id.as_str()))
        .await
        .map_err(store_error)?;
    user.ok_or_else(|| {
        warn!("Verified credential for vanished user {}", authed.user_id);
        ApiError::unauthorized()
    })
}

/// 409 when the address exists (case-insensitively) or an unexpired email
/// change already reserves it.
pub(crate) async fn ensure_email_available(
    state: &AppState,
    email: &str,
) -> Result<(), ApiError> {
    if state
        .users
        .get_by_email(email)
        .await
        .map_err(store_error)?
        .is_some()
    {
        return Err(ApiError::conflict("email address is already taken"));
    }
    if state
        .pending_actions
        .payload_reserved(email)
        .await
        .map_err(store_error)?
    {
        return Err(ApiError::conflict("email address is already reserved"));
    }
    Ok(())
}

pub(crate) fn hash_password(
    state: &AppState,
    plaintext: &str,
) -> Result<String, ApiError> {
    password::hash_password(plaintext, state.config.password_hash_cost)
        .map_err(|err| ApiError::internal(format!("hashing failed: {err}")))
}

fn mint_access_token(
    state: &AppState,
    user: &User,
) -> Result<String, ApiError> {
    state.token_mint.mint(user).map_err(|err| {
        ApiError::internal(format!("could not mint access token: {err}"))
    })
}

/// Delivery is best-effort; a transport error never fails the request.
async fn send_mail(state: &AppState, to: &str, body: String) {
    if let Err(err) = state.mailer.send(to, &body).await {
        warn!("Mail delivery to {to} failed: {err:#}");
    }
}

fn build_totp(
    issuer: &str,
    account: &str,
    base32_secret: &str,
) -> Result<TOTP, ApiError> {
    let secret_bytes = Secret::Encoded(base32_secret.to_owned())
        .to_bytes()
        .map_err(|err| {
            ApiError::internal(format!("bad TOTP secret: {err:?}"))
        })?;
    TOTP::new(
        totp_rs::Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        Some(issuer.to_owned()),
        account.to_owned(),
    )
    .map_err(|err| ApiError::internal(format!("could not build TOTP: {err}")))
}

/// Whether `code` is currently valid for the user's encrypted secret. Any
/// decryption or clock failure counts as invalid.
fn is_valid_otp(state: &AppState, user: &User, code: &str) -> bool {
    let secret = match state.cipher.decrypt(&user.otp_secret) {
        Ok(secret) => secret,
        Err(err) => {
            warn!("Could not decrypt TOTP secret for {}: {err}", user.id);
            return false;
        }
    };
    match build_totp(&state.config.totp_issuer, &user.email, &secret) {
        Ok(totp) => totp.check_current(code).unwrap_or(false),
        Err(err) => {
            warn!("Could not rebuild TOTP for {}: {}", user.id, err.msg);
            false
        }
    }
}
