//! Process configuration, read entirely from environment variables.
//!
//! Every variable has a default suitable for local development; invalid
//! values (unparseable addresses, URLs, lifetimes, or an encryption key of
//! the wrong length) are fatal at startup.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;

use crate::password;

/// Number of characters in a generated default signing / encryption key.
const GENERATED_KEY_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct Config {
    /// HMAC secret for access credentials. When the env var is unset a fresh
    /// random key is generated per process start; all previously issued
    /// access tokens become invalid across such restarts.
    pub jwt_signing_key: String,

    pub public_listen_addr: SocketAddr,
    /// Mount point of the auth API, normalized to `/{path}/` form.
    pub public_api_path: String,

    pub backend_listen_addr: SocketAddr,
    pub backend_cert_dir: PathBuf,
    pub backend_generate_cert: bool,
    pub backend_cert_ips: Vec<IpAddr>,
    pub backend_cert_hostnames: Vec<String>,

    pub template_signup: PathBuf,
    pub template_change_email: PathBuf,
    pub template_reset_password: PathBuf,
    pub template_new_password: PathBuf,

    /// Handed verbatim to the storage backend; the in-memory backend
    /// ignores both.
    pub store_url: String,
    pub store_name: String,

    pub enable_cors: bool,
    pub cors_origin: String,
    pub cors_headers: String,

    pub smtp_server: String,
    pub smtp_sender_addr: String,

    pub allow_signup: bool,
    pub allow_change_password: bool,
    pub allow_change_email: bool,
    pub allow_forgot_password: bool,
    pub allow_delete_account: bool,
    pub enable_totp: bool,

    pub totp_issuer: String,
    /// AES key for TOTP secrets at rest; must be 16, 24, or 32 bytes.
    pub totp_encryption_key: String,

    pub proxy_target: reqwest::Url,
    /// Operator-configured upstream path prefixes that bypass the gate.
    pub proxy_whitelist: Vec<String>,

    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    pub pending_action_lifetime: Duration,

    pub password_hash_cost: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let public_api_path =
            normalize_prefix(&env_str("PUBLIC_API_PATH", "/auth/"));

        Ok(Self {
            jwt_signing_key: env_str(
                "JWT_SIGNING_KEY",
                &password::generate_password(GENERATED_KEY_LEN),
            ),
            public_listen_addr: env_parse("PUBLIC_LISTEN_ADDR", "0.0.0.0:8080")?,
            public_api_path,
            backend_listen_addr: env_parse(
                "BACKEND_LISTEN_ADDR",
                "0.0.0.0:8443",
            )?,
            backend_cert_dir: PathBuf::from(env_str(
                "BACKEND_CERT_DIR",
                "certs/",
            )),
            backend_generate_cert: env_bool("BACKEND_GENERATE_CERT", false),
            backend_cert_ips: env_list("BACKEND_CERT_IPS", "127.0.0.1", ',')
                .iter()
                .map(|ip| {
                    ip.parse().with_context(|| format!("Bad cert IP {ip:?}"))
                })
                .collect::<anyhow::Result<_>>()?,
            backend_cert_hostnames: env_list(
                "BACKEND_CERT_HOSTNAMES",
                "localhost",
                ',',
            ),
            template_signup: PathBuf::from(env_str(
                "TEMPLATE_SIGNUP",
                "res/signup.tpl",
            )),
            template_change_email: PathBuf::from(env_str(
                "TEMPLATE_CHANGE_EMAIL",
                "res/changeemail.tpl",
            )),
            template_reset_password: PathBuf::from(env_str(
                "TEMPLATE_RESET_PASSWORD",
                "res/resetpassword.tpl",
            )),
            template_new_password: PathBuf::from(env_str(
                "TEMPLATE_NEW_PASSWORD",
                "res/newpassword.tpl",
            )),
            store_url: env_str("STORE_URL", "memory://"),
            store_name: env_str("STORE_NAME", "authgate"),
            enable_cors: env_bool("CORS_ENABLE", false),
            cors_origin: env_str("CORS_ORIGIN", "*"),
            cors_headers: env_str("CORS_HEADERS", "*"),
            smtp_server: env_str("SMTP_SERVER", "127.0.0.1:25"),
            smtp_sender_addr: env_str("SMTP_SENDER_ADDR", "no-reply@localhost"),
            allow_signup: env_bool("ALLOW_SIGNUP", true),
            allow_change_password: env_bool("ALLOW_CHANGE_PASSWORD", true),
            allow_change_email: env_bool("ALLOW_CHANGE_EMAIL", true),
            allow_forgot_password: env_bool("ALLOW_FORGOT_PASSWORD", true),
            allow_delete_account: env_bool("ALLOW_DELETE_ACCOUNT", true),
            enable_totp: env_bool("ENABLE_TOTP", true),
            totp_issuer: env_str("TOTP_ISSUER", "authgate"),
            totp_encryption_key: env_str(
                "TOTP_ENCRYPTION_KEY",
                &password::generate_password(GENERATED_KEY_LEN),
            ),
            proxy_target: env_str("PROXY_TARGET", "http://127.0.0.1:80")
                .parse()
                .context("Bad PROXY_TARGET url")?,
            proxy_whitelist: env_list("PROXY_WHITELIST", "", ':'),
            access_token_lifetime: env_minutes("ACCESS_TOKEN_LIFETIME", 5)?,
            refresh_token_lifetime: env_minutes(
                "REFRESH_TOKEN_LIFETIME",
                24 * 60,
            )?,
            pending_action_lifetime: env_minutes(
                "PENDING_ACTION_LIFETIME",
                24 * 60,
            )?,
            password_hash_cost: env_parse(
                "PASSWORD_HASH_COST",
                &bcrypt::DEFAULT_COST.to_string(),
            )?,
        })
    }

    /// The auth API paths which must be reachable without a credential.
    pub fn anonymous_prefixes(&self) -> [String; 4] {
        let prefix = &self.public_api_path;
        [
            format!("{prefix}login"),
            format!("{prefix}signup"),
            format!("{prefix}confirm/"),
            format!("{prefix}initpwreset"),
        ]
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_owned(),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_str(key, if default { "1" } else { "0" }) == "1"
}

fn env_parse<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_str(key, default)
        .parse()
        .with_context(|| format!("Bad value for {key}"))
}

fn env_minutes(key: &str, default_minutes: u64) -> anyhow::Result<Duration> {
    let minutes: u64 = env_parse(key, &default_minutes.to_string())?;
    Ok(Duration::from_secs(minutes * 60))
}

/// Split a separated list, dropping empty entries so an unset variable means
/// "no entries" rather than one empty prefix which would match everything.
fn env_list(key: &str, default: &str, separator: char) -> Vec<String> {
    env_str(key, default)
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Normalize an API mount path to have exactly one leading and one trailing
/// slash.
fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}/")
    }
}
