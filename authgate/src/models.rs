//! The three persisted record types and their identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Opaque stable user identifier, assigned on create.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    /// Unique key, compared case-insensitively by the store.
    pub email: String,
    /// bcrypt hash; the plaintext never persists.
    pub password_hash: String,
    /// Set by the signup confirmation workflow. Unconfirmed users cannot
    /// authenticate.
    pub confirmed: bool,
    /// Administratively togglable. Disabled users cannot authenticate even
    /// when confirmed.
    pub enabled: bool,
    /// True only after the user has both generated a TOTP secret and
    /// validated a live code against it.
    pub otp_enabled: bool,
    /// The shared TOTP secret, encrypted at rest. Empty = absent.
    pub otp_secret: String,
    pub create_date: OffsetDateTime,
    /// Opaque operator-owned value, round-tripped as JSON.
    pub data: serde_json::Value,
}

impl User {
    /// Invariant check: an enabled second factor implies a stored secret.
    pub fn has_committed_otp(&self) -> bool {
        self.otp_enabled && !self.otp_secret.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: UserId,
    /// Random unguessable value with 128 bits of entropy, unique across
    /// live rows.
    pub token: String,
    pub create_date: OffsetDateTime,
    pub expiry_date: OffsetDateTime,
}

impl RefreshToken {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiry_date <= now
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PendingActionType {
    /// Initial signup confirmation; flips `User::confirmed`.
    ConfirmAccount,
    /// Email change; the pending `payload` holds the proposed address and
    /// counts as an in-flight reservation of it while unexpired.
    ChangeEmail,
    /// Password reset; confirmation replaces the password with a freshly
    /// generated one sent by mail.
    InitPasswordReset,
}

#[derive(Clone, Debug)]
pub struct PendingAction {
    pub id: String,
    pub user_id: UserId,
    /// Single-use confirmation token, same generation discipline as
    /// [`RefreshToken::token`].
    pub token: String,
    pub action_type: PendingActionType,
    pub payload: String,
    pub create_date: OffsetDateTime,
    pub expiry_date: OffsetDateTime,
}

impl PendingAction {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiry_date <= now
    }
}
