//! Repositories over the [`Store`]: record construction, lazy expiry,
//! unused-token generation, and the user-delete cascade.
//!
//! Lazy expiry and the hourly sweep are redundant on purpose: the sweep
//! bounds storage growth while the fetch-time delete guarantees no caller
//! ever observes a stale row.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::warn;

use crate::{
    models::{PendingAction, PendingActionType, RefreshToken, User, UserId},
    store::{Store, StoreError},
    token,
};

/// Attempts at finding an unused opaque token value before giving up. A
/// collision among 128-bit values is wildly unlikely; the retry exists to
/// tolerate a weak random source.
const TOKEN_RETRIES: usize = 20;

#[derive(Clone)]
pub struct UserRepo {
    store: Arc<dyn Store>,
}

impl UserRepo {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert a freshly constructed user record.
    pub async fn create(
        &self,
        email: String,
        password_hash: String,
        confirmed: bool,
        enabled: bool,
        data: serde_json::Value,
    ) -> Result<User, StoreError> {
        let user = User {
            id: UserId::generate(),
            email,
            password_hash,
            confirmed,
            enabled,
            otp_enabled: false,
            otp_secret: String::new(),
            create_date: OffsetDateTime::now_utc(),
            data,
        };
        self.store.insert_user(user.clone()).await?;
        Ok(user)
    }

    pub async fn get(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.store.user_by_id(id).await
    }

    /// Case-insensitive lookup by email.
    pub async fn get_by_email(
        &self,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        self.store.user_by_email(email).await
    }

    pub async fn update(&self, user: &User) -> Result<(), StoreError> {
        self.store.update_user(user).await
    }

    /// Delete the user and cascade to every refresh token and pending
    /// action referencing it. The cascade is a policy applied here, at
    /// delete time; the token rows carry no reverse ownership edge.
    pub async fn delete(&self, user: &User) -> Result<(), StoreError> {
        self.store.delete_pending_actions_for_user(&user.id).await?;
        self.store.delete_refresh_tokens_for_user(&user.id).await?;
        self.store.delete_user(&user.id).await
    }
}

#[derive(Clone)]
pub struct RefreshTokenRepo {
    store: Arc<dyn Store>,
}

impl RefreshTokenRepo {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Mint and persist a refresh token for `user_id`.
    pub async fn create(
        &self,
        user_id: &UserId,
        lifetime: Duration,
    ) -> Result<RefreshToken, StoreError> {
        let now = OffsetDateTime::now_utc();
        let row = RefreshToken {
            id: token::generate_opaque_token(),
            user_id: user_id.clone(),
            token: self.find_unused_token().await?,
            create_date: now,
            expiry_date: now + lifetime,
        };
        self.store.insert_refresh_token(row.clone()).await?;
        Ok(row)
    }

    /// Fetch by opaque token value. An expired row is deleted and reported
    /// as absent, so a `Some` result is always strictly unexpired.
    pub async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let Some(row) = self.store.refresh_token_by_token(token).await? else {
            return Ok(None);
        };
        if row.is_expired(OffsetDateTime::now_utc()) {
            self.delete(&row).await;
            return Ok(None);
        }
        Ok(Some(row))
    }

    /// Best-effort delete; storage errors during cleanup are logged and
    /// swallowed.
    pub async fn delete(&self, row: &RefreshToken) {
        if let Err(err) = self.store.delete_refresh_token(&row.id).await {
            warn!("Failed to delete refresh token {}: {err}", row.id);
        }
    }

    pub async fn delete_expired(
        &self,
        now: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        self.store.delete_expired_refresh_tokens(now).await
    }

    async fn find_unused_token(&self) -> Result<String, StoreError> {
        for _ in 0..TOKEN_RETRIES {
            let candidate = token::generate_opaque_token();
            if self.get_by_token(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(StoreError::Backend(
            "could not find an unused refresh token value".to_owned(),
        ))
    }
}

#[derive(Clone)]
pub struct PendingActionRepo {
    store: Arc<dyn Store>,
}

impl PendingActionRepo {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: &UserId,
        action_type: PendingActionType,
        payload: String,
        lifetime: Duration,
    ) -> Result<PendingAction, StoreError> {
        let now = OffsetDateTime::now_utc();
        let row = PendingAction {
            id: token::generate_opaque_token(),
            user_id: user_id.clone(),
            token: self.find_unused_token().await?,
            action_type,
            payload,
            create_date: now,
            expiry_date: now + lifetime,
        };
        self.store.insert_pending_action(row.clone()).await?;
        Ok(row)
    }

    /// Same lazy-expiry contract as refresh tokens.
    pub async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PendingAction>, StoreError> {
        let Some(row) = self.store.pending_action_by_token(token).await? else {
            return Ok(None);
        };
        if row.is_expired(OffsetDateTime::now_utc()) {
            self.delete(&row).await;
            return Ok(None);
        }
        Ok(Some(row))
    }

    /// Whether any unexpired pending action reserves `payload` (used to
    /// block signups and email changes onto an address with an in-flight
    /// change).
    pub async fn payload_reserved(
        &self,
        payload: &str,
    ) -> Result<bool, StoreError> {
        let now = OffsetDateTime::now_utc();
        let rows =
            self.store.pending_actions_by_payload(payload, now).await?;
        Ok(!rows.is_empty())
    }

    pub async fn delete(&self, row: &PendingAction) {
        if let Err(err) = self.store.delete_pending_action(&row.id).await {
            warn!("Failed to delete pending action {}: {err}", row.id);
        }
    }

    pub async fn delete_expired(
        &self,
        now: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        self.store.delete_expired_pending_actions(now).await
    }

    async fn find_unused_token(&self) -> Result<String, StoreError> {
        for _ in 0..TOKEN_RETRIES {
            let candidate = token::generate_opaque_token();
            if self.get_by_token(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(StoreError::Backend(
            "could not find an unused pending action token value".to_owned(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemoryStore;

    fn repos() -> (UserRepo, RefreshTokenRepo, PendingActionRepo) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (
            UserRepo::new(store.clone()),
            RefreshTokenRepo::new(store.clone()),
            PendingActionRepo::new(store),
        )
    }

    async fn create_user(users: &UserRepo, email: &str) -> User {
        users
            .create(
                email.to_owned(),
                "hash".to_owned(),
                true,
                true,
                serde_json::Value::Null,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn refresh_lookup_applies_lazy_expiry() {
        let (users, refresh_tokens, _) = repos();
        let user = create_user(&users, "a@example.com").await;

        // An already-expired row must read as absent and get deleted.
        let row = refresh_tokens
            .create(&user.id, Duration::ZERO)
            .await
            .unwrap();
        assert!(row.is_expired(OffsetDateTime::now_utc()));
        let fetched =
            refresh_tokens.get_by_token(&row.token).await.unwrap();
        assert!(fetched.is_none());

        // A live row comes back strictly unexpired.
        let live = refresh_tokens
            .create(&user.id, Duration::from_secs(3600))
            .await
            .unwrap();
        let fetched = refresh_tokens
            .get_by_token(&live.token)
            .await
            .unwrap()
            .unwrap();
        assert!(fetched.expiry_date > OffsetDateTime::now_utc());
    }

    #[tokio::test]
    async fn pending_lookup_applies_lazy_expiry() {
        let (users, _, pending_actions) = repos();
        let user = create_user(&users, "a@example.com").await;

        let row = pending_actions
            .create(
                &user.id,
                PendingActionType::ChangeEmail,
                "new@example.com".to_owned(),
                Duration::ZERO,
            )
            .await
            .unwrap();
        let fetched =
            pending_actions.get_by_token(&row.token).await.unwrap();
        assert!(fetched.is_none());

        // Expired reservations don't block.
        assert!(
            !pending_actions
                .payload_reserved("new@example.com")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn user_delete_cascades() {
        let (users, refresh_tokens, pending_actions) = repos();
        let user = create_user(&users, "a@example.com").await;
        let other = create_user(&users, "b@example.com").await;

        let mine = refresh_tokens
            .create(&user.id, Duration::from_secs(3600))
            .await
            .unwrap();
        let theirs = refresh_tokens
            .create(&other.id, Duration::from_secs(3600))
            .await
            .unwrap();
        let pending = pending_actions
            .create(
                &user.id,
                PendingActionType::ConfirmAccount,
                String::new(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        users.delete(&user).await.unwrap();

        assert!(users.get(&user.id).await.unwrap().is_none());
        assert!(
            refresh_tokens
                .get_by_token(&mine.token)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            pending_actions
                .get_by_token(&pending.token)
                .await
                .unwrap()
                .is_none()
        );
        // Unrelated rows survive.
        assert!(
            refresh_tokens
                .get_by_token(&theirs.token)
                .await
                .unwrap()
                .is_some()
        );
    }
}
