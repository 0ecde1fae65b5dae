//! End-to-end flows through the public auth API: signup, confirmation,
//! login, token lifecycle, password and email changes, account deletion,
//! and TOTP enrolment.

mod common;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use common::{
    Harness, TEST_PASSWORD, get, login, post_json, signup_confirm_login,
    test_config,
};
use http::StatusCode;
use serde_json::json;

fn harness() -> Harness {
    Harness::new(test_config("http://127.0.0.1:1"))
}

#[tokio::test]
async fn signup_confirm_login_roundtrip() {
    let harness = harness();
    let router = harness.public_router();

    let response = post_json(
        &router,
        "/auth/signup",
        None,
        json!({ "email": "foo@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let user_id = response.header("x-object-id").expect("X-Object-ID header");
    assert!(!user_id.is_empty());

    // Unconfirmed accounts cannot log in.
    let response = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "foo@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // The captured signup mail carries the confirmation token.
    let mail = harness.mailer.last().expect("signup mail");
    assert_eq!(mail.to, "foo@bar.com");
    let token = harness.value_from_last_mail("confirm:");

    let response = post_json(
        &router,
        &format!("/auth/confirm/{token}"),
        None,
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let (access, _refresh) = login(&router, "foo@bar.com", TEST_PASSWORD).await;

    // The credential works against an authenticated endpoint.
    let response = get(&router, "/auth/ping", Some(&access)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // Confirmation tokens are single-use.
    let response = post_json(
        &router,
        &format!("/auth/confirm/{token}"),
        None,
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signup_rejects_taken_and_reserved_addresses() {
    let harness = harness();
    let router = harness.public_router();
    let (access, _) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Case-insensitive collision with the existing account.
    let response = post_json(
        &router,
        "/auth/signup",
        None,
        json!({ "email": "FOO@BAR.COM", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    // Reserve a second address via an in-flight email change...
    let response = post_json(
        &router,
        "/auth/changeemail",
        Some(&access),
        json!({ "email": "foo2@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // ...which now blocks signups onto it.
    let response = post_json(
        &router,
        "/auth/signup",
        None,
        json!({ "email": "foo2@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_failures_are_uniform_401s() {
    let harness = harness();
    let router = harness.public_router();
    signup_confirm_login(&harness, &router, "foo@bar.com").await;

    let unknown = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "nobody@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    let wrong_password = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "foo@bar.com", "password": "wrongwrong" }),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    // No account-existence oracle: the bodies are identical.
    assert_eq!(unknown.body, wrong_password.body);

    // A disabled account is rejected even with the right password.
    let user = harness
        .state
        .users
        .get_by_email("foo@bar.com")
        .await
        .unwrap()
        .unwrap();
    let mut disabled = user.clone();
    disabled.enabled = false;
    harness.state.users.update(&disabled).await.unwrap();

    let response = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "foo@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_request_bodies_are_400() {
    let harness = harness();
    let router = harness.public_router();

    // Password too short.
    let response = post_json(
        &router,
        "/auth/signup",
        None,
        json!({ "email": "foo@bar.com", "password": "1234567" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Password too long.
    let response = post_json(
        &router,
        "/auth/signup",
        None,
        json!({ "email": "foo@bar.com", "password": "x".repeat(33) }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Not an email.
    let response = post_json(
        &router,
        "/auth/signup",
        None,
        json!({ "email": "not-an-email", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Not JSON at all.
    let request = http::Request::builder()
        .method("POST")
        .uri("/auth/signup")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = common::send(&router, request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn set_password_flow() {
    let harness = harness();
    let router = harness.public_router();
    let (access, _) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Wrong old password.
    let response = post_json(
        &router,
        "/auth/setpw",
        Some(&access),
        json!({ "oldPassword": "wrongwrong", "newPassword": "00000000" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = post_json(
        &router,
        "/auth/setpw",
        Some(&access),
        json!({ "oldPassword": TEST_PASSWORD, "newPassword": "00000000" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let old = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "foo@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(old.status, StatusCode::UNAUTHORIZED);
    login(&router, "foo@bar.com", "00000000").await;
}

#[tokio::test]
async fn refresh_and_logout_lifecycle() {
    let harness = harness();
    let router = harness.public_router();
    let (access, refresh) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Refresh requires a valid access credential.
    let response = post_json(
        &router,
        "/auth/refresh",
        None,
        json!({ "refreshToken": refresh }),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = post_json(
        &router,
        "/auth/refresh",
        Some(&access),
        json!({ "refreshToken": refresh }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.body["accessToken"].as_str().unwrap().is_empty());
    // The refresh token is returned unchanged, not rotated.
    assert_eq!(response.body["refreshToken"].as_str().unwrap(), refresh);

    // An unknown refresh token is a 400, not a 401.
    let response = post_json(
        &router,
        "/auth/refresh",
        Some(&access),
        json!({ "refreshToken": "doesnotexist" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = post_json(
        &router,
        "/auth/logout",
        Some(&access),
        json!({ "refreshToken": refresh }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // The deleted row no longer refreshes, and a second logout is a 400.
    let response = post_json(
        &router,
        "/auth/refresh",
        Some(&access),
        json!({ "refreshToken": refresh }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let response = post_json(
        &router,
        "/auth/logout",
        Some(&access),
        json!({ "refreshToken": refresh }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tampered_credentials_are_rejected() {
    let harness = harness();
    let router = harness.public_router();
    let (access, _) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Substitute the email inside the signed payload, keeping the original
    // signature.
    let [header, payload, signature]: [&str; 3] = access
        .split('.')
        .collect::<Vec<_>>()
        .try_into()
        .unwrap();
    let decoded = URL_SAFE_NO_PAD.decode(payload).unwrap();
    let swapped = String::from_utf8(decoded)
        .unwrap()
        .replace("foo@bar.com", "bar@bar.com");
    let forged_payload = URL_SAFE_NO_PAD.encode(swapped.as_bytes());
    let forged = format!("{header}.{forged_payload}.{signature}");

    let response = get(&router, "/auth/ping", Some(&forged)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Missing and malformed credentials fail the same way.
    let response = get(&router, "/auth/ping", None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    let response = get(&router, "/auth/ping", Some("garbage")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_email_is_invisible_until_confirmed() {
    let harness = harness();
    let router = harness.public_router();
    let (access, _) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;
    let original = harness
        .state
        .users
        .get_by_email("foo@bar.com")
        .await
        .unwrap()
        .unwrap();

    let response = post_json(
        &router,
        "/auth/changeemail",
        Some(&access),
        json!({ "email": "foo2@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // The confirmation went to the proposed address, and the new address
    // does not resolve yet.
    let mail = harness.mailer.last().unwrap();
    assert_eq!(mail.to, "foo2@bar.com");
    let lookup =
        harness.state.users.get_by_email("foo2@bar.com").await.unwrap();
    assert!(lookup.is_none());

    let token = harness.value_from_last_mail("confirm:");
    let response = post_json(
        &router,
        &format!("/auth/confirm/{token}"),
        None,
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // Now it resolves, to the same user.
    let moved = harness
        .state
        .users
        .get_by_email("foo2@bar.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.id, original.id);
    login(&router, "foo2@bar.com", TEST_PASSWORD).await;
}

#[tokio::test]
async fn password_reset_flow() {
    let harness = harness();
    let router = harness.public_router();
    signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Unknown address is a 400.
    let response = post_json(
        &router,
        "/auth/initpwreset",
        None,
        json!({ "email": "nobody@bar.com" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = post_json(
        &router,
        "/auth/initpwreset",
        None,
        json!({ "email": "foo@bar.com" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let token = harness.value_from_last_mail("confirm:");
    let response = post_json(
        &router,
        &format!("/auth/confirm/{token}"),
        None,
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // The generated password arrives by mail and logs in; the old one is
    // dead.
    let new_password = harness.value_from_last_mail("password:");
    assert_eq!(new_password.len(), 8);
    let response = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "foo@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    login(&router, "foo@bar.com", &new_password).await;
}

#[tokio::test]
async fn delete_account_cascades() {
    let harness = harness();
    let router = harness.public_router();
    let (access, refresh) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    let response = post_json(
        &router,
        "/auth/delete",
        Some(&access),
        json!({ "password": "wrongwrong" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = post_json(
        &router,
        "/auth/delete",
        Some(&access),
        json!({ "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let gone = harness.state.users.get_by_email("foo@bar.com").await.unwrap();
    assert!(gone.is_none());
    let row = harness
        .state
        .refresh_tokens
        .get_by_token(&refresh)
        .await
        .unwrap();
    assert!(row.is_none(), "refresh token survived account deletion");
}

#[tokio::test]
async fn unknown_auth_paths_are_not_proxied() {
    let harness = harness();
    let router = harness.public_router();
    let (access, _) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Would be a 502 if it fell through to the (dead) upstream.
    let response = post_json(
        &router,
        "/auth/nonexistent",
        Some(&access),
        json!({}),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn totp_enrolment_and_login() {
    let harness = harness();
    let router = harness.public_router();
    let (access, _) =
        signup_confirm_login(&harness, &router, "foo@bar.com").await;

    // Confirming before init is a 400.
    let response = post_json(
        &router,
        "/auth/otp/confirm",
        Some(&access),
        json!({ "passcode": "123456" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = post_json(&router, "/auth/otp/init", Some(&access), json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let secret = response.body["secret"].as_str().unwrap().to_owned();
    assert!(!secret.is_empty());
    assert!(!response.body["image"].as_str().unwrap().is_empty());

    // The uncommitted secret does not yet affect login.
    login(&router, "foo@bar.com", TEST_PASSWORD).await;

    // A wrong passcode does not commit the enrolment.
    let response = post_json(
        &router,
        "/auth/otp/confirm",
        Some(&access),
        json!({ "passcode": "000000" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = post_json(
        &router,
        "/auth/otp/confirm",
        Some(&access),
        json!({ "passcode": current_code(&secret) }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    // Password alone now yields the half-open response with no tokens.
    let response = post_json(
        &router,
        "/auth/login",
        None,
        json!({ "email": "foo@bar.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["otpRequired"], json!(true));
    assert_eq!(response.body["accessToken"], json!(""));
    assert_eq!(response.body["refreshToken"], json!(""));

    // Password + live code yields tokens.
    let response = post_json(
        &router,
        "/auth/login",
        None,
        json!({
            "email": "foo@bar.com",
            "password": TEST_PASSWORD,
            "otp": current_code(&secret),
        }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["otpRequired"], json!(false));
    assert!(!response.body["accessToken"].as_str().unwrap().is_empty());

    // Re-running init on a committed enrolment is a 400; disable first.
    let response = post_json(&router, "/auth/otp/init", Some(&access), json!({}))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let response =
        post_json(&router, "/auth/otp/disable", Some(&access), json!({}))
            .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    login(&router, "foo@bar.com", TEST_PASSWORD).await;
}

/// The code the enrolled authenticator would currently display.
fn current_code(base32_secret: &str) -> String {
    let secret = totp_rs::Secret::Encoded(base32_secret.to_owned())
        .to_bytes()
        .unwrap();
    let totp = totp_rs::TOTP::new(
        totp_rs::Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some("authgate-test".to_owned()),
        "foo@bar.com".to_owned(),
    )
    .unwrap();
    totp.generate_current().unwrap()
}
