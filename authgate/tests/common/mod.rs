//! Shared harness for the integration suites: an `AppState` over a fresh
//! in-memory store and a capturing mailer, plus small HTTP helpers for
//! driving a router without binding a socket.

#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use authgate::{
    app::{AppState, public_router},
    config::Config,
    mail::{MailTemplates, MockMailer},
    store::MemoryStore,
};
use axum::{Router, body::Body};
use http::{HeaderMap, Request, StatusCode, header};
use tower::ServiceExt;

pub const TEST_PASSWORD: &str = "12345678";

/// A config with every feature enabled, ephemeral ports, and cheap bcrypt
/// rounds. `proxy_target` is where the proxy tests point their upstream.
pub fn test_config(proxy_target: &str) -> Config {
    Config {
        jwt_signing_key: "test-signing-key".to_owned(),
        public_listen_addr: "127.0.0.1:0".parse().unwrap(),
        public_api_path: "/auth/".to_owned(),
        backend_listen_addr: "127.0.0.1:0".parse().unwrap(),
        backend_cert_dir: PathBuf::from("unused-certs"),
        backend_generate_cert: false,
        backend_cert_ips: vec!["127.0.0.1".parse().unwrap()],
        backend_cert_hostnames: vec!["localhost".to_owned()],
        template_signup: PathBuf::from("unused.tpl"),
        template_change_email: PathBuf::from("unused.tpl"),
        template_reset_password: PathBuf::from("unused.tpl"),
        template_new_password: PathBuf::from("unused.tpl"),
        store_url: "memory://".to_owned(),
        store_name: "authgate-test".to_owned(),
        enable_cors: false,
        cors_origin: "*".to_owned(),
        cors_headers: "*".to_owned(),
        smtp_server: "127.0.0.1:25".to_owned(),
        smtp_sender_addr: "no-reply@localhost".to_owned(),
        allow_signup: true,
        allow_change_password: true,
        allow_change_email: true,
        allow_forgot_password: true,
        allow_delete_account: true,
        enable_totp: true,
        totp_issuer: "authgate-test".to_owned(),
        totp_encryption_key: "0123456789abcdef0123456789abcdef".to_owned(),
        proxy_target: proxy_target.parse().unwrap(),
        proxy_whitelist: Vec::new(),
        access_token_lifetime: Duration::from_secs(5 * 60),
        refresh_token_lifetime: Duration::from_secs(24 * 60 * 60),
        pending_action_lifetime: Duration::from_secs(24 * 60 * 60),
        password_hash_cost: 4,
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<MockMailer>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(MockMailer::new());
        // Tests render terse templates whose bodies are trivially parseable.
        let templates = MailTemplates::from_strings(
            "To: {{to}}\n\nconfirm:{{confirmID}}",
            "To: {{to}}\n\nconfirm:{{confirmID}}",
            "To: {{to}}\n\nconfirm:{{confirmID}}",
            "To: {{to}}\n\npassword:{{password}}",
            config.smtp_sender_addr.clone(),
        )
        .expect("test templates");
        let state = AppState::new(
            config,
            store.clone(),
            mailer.clone(),
            templates,
        )
        .expect("test state");
        Self {
            state: Arc::new(state),
            store,
            mailer,
        }
    }

    pub fn public_router(&self) -> Router<()> {
        public_router(self.state.clone()).expect("public router")
    }

    /// The token or password carried by the most recent captured mail,
    /// e.g. `value_from_last_mail("confirm:")`.
    pub fn value_from_last_mail(&self, prefix: &str) -> String {
        let mail = self.mailer.last().expect("no mail captured");
        mail.body
            .split(prefix)
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or_else(|| panic!("no {prefix:?} in mail: {}", mail.body))
            .to_owned()
    }
}

/// One response, fully read.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }
}

pub async fn send(
    router: &Router<()>,
    request: Request<Body>,
) -> TestResponse {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("infallible router");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn post_json(
    router: &Router<()>,
    uri: &str,
    bearer: Option<&str>,
    body: serde_json::Value,
) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder =
            builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder
        .body(Body::from(body.to_string()))
        .expect("request build");
    send(router, request).await
}

pub async fn get(
    router: &Router<()>,
    uri: &str,
    bearer: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder =
            builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder.body(Body::empty()).expect("request build");
    send(router, request).await
}

/// Run the whole signup + confirm + login flow; returns
/// `(access_token, refresh_token)`.
pub async fn signup_confirm_login(
    harness: &Harness,
    router: &Router<()>,
    email: &str,
) -> (String, String) {
    let response = post_json(
        router,
        "/auth/signup",
        None,
        serde_json::json!({ "email": email, "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let token = harness.value_from_last_mail("confirm:");
    let response =
        post_json(router, &format!("/auth/confirm/{token}"), None, serde_json::Value::Null)
            .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    login(router, email, TEST_PASSWORD).await
}

pub async fn login(
    router: &Router<()>,
    email: &str,
    password: &str,
) -> (String, String) {
    let response = post_json(
        router,
        "/auth/login",
        None,
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "login failed: {:?}", response.body);
    let access = response.body["accessToken"].as_str().unwrap().to_owned();
    let refresh = response.body["refreshToken"].as_str().unwrap().to_owned();
    assert!(!access.is_empty());
    assert!(!refresh.is_empty());
    (access, refresh)
}
