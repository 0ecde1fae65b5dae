//! An authenticating reverse proxy: end users authenticate with email +
//! password (optionally TOTP), receive a short-lived JWT access credential
//! and a long-lived opaque refresh token, and every other request is
//! verified, enriched with the authenticated identity, and forwarded to a
//! single upstream. A second, mutually-authenticated listener exposes
//! administrative user management to a trusted backend.

/// Administrative `/users/` endpoints served on the mTLS listener.
pub mod admin_routes;
/// App wiring: state, routers, listeners, sweepers, shutdown.
pub mod app;
/// The `/auth/` endpoints: login, tokens, signup, confirmations, TOTP.
pub mod auth_routes;
/// Environment-variable configuration.
pub mod config;
/// Encryption-at-rest for TOTP secrets.
pub mod crypt;
/// The per-request authentication middleware.
pub mod gate;
/// Global `tracing` logger setup.
pub mod logger;
/// Outbound mail: transport trait, SMTP impl, templates.
pub mod mail;
/// Persisted record types.
pub mod models;
/// bcrypt hashing and random password generation.
pub mod password;
/// Upstream request forwarding.
pub mod proxy;
/// Repositories: lazy expiry, token generation, user-delete cascade.
pub mod repository;
/// The storage interface and the in-memory backend.
pub mod store;
/// Hourly deletion of expired refresh tokens and pending actions.
pub mod sweeper;
/// Access-credential minting and verification.
pub mod token;
