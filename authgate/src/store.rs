//! The storage interface the core consumes, plus the in-memory backend.
//!
//! A production deployment plugs a durable backend in behind [`Store`]. The
//! contract is small: three collections with primary-key and
//! secondary lookups, a case-insensitive unique index on user email, and
//! bulk deletes by owner and by expiry. Expiry *filters* live here (pushed
//! into the query, like the original's store); the lazy-expiry *delete* on
//! fetch is repository policy.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::models::{PendingAction, RefreshToken, User, UserId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Violation of the unique case-insensitive email index. Two concurrent
    /// writes for the same address resolve to exactly one success; the
    /// loser observes this error.
    #[error("email address is already taken")]
    DuplicateEmail,
    #[error("no such user")]
    UnknownUser,
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The persistence operations the core consumes. Object-safe so the app can
/// hold an `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    // --- users --- //

    /// Insert a new user. Fails with [`StoreError::DuplicateEmail`] if the
    /// email is taken under case-insensitive comparison.
    async fn insert_user(&self, user: User) -> Result<(), StoreError>;
    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>, StoreError>;
    /// Case-insensitive email lookup.
    async fn user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<User>, StoreError>;
    /// Replace the stored user. Same unique-email constraint as insert.
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;
    async fn delete_user(&self, id: &UserId) -> Result<(), StoreError>;

    // --- refresh tokens --- //

    async fn insert_refresh_token(
        &self,
        token: RefreshToken,
    ) -> Result<(), StoreError>;
    async fn refresh_token_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, StoreError>;
    async fn delete_refresh_token(&self, id: &str) -> Result<(), StoreError>;
    async fn delete_refresh_tokens_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<(), StoreError>;
    /// Delete every row with `expiry_date <= now`; returns how many.
    async fn delete_expired_refresh_tokens(
        &self,
        now: OffsetDateTime,
    ) -> Result<usize, StoreError>;

    // --- pending actions --- //

    async fn insert_pending_action(
        &self,
        action: PendingAction,
    ) -> Result<(), StoreError>;
    async fn pending_action_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PendingAction>, StoreError>;
    /// All *unexpired* rows whose payload equals `payload`; the expiry
    /// filter is part of the query.
    async fn pending_actions_by_payload(
        &self,
        payload: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<PendingAction>, StoreError>;
    async fn delete_pending_action(&self, id: &str) -> Result<(), StoreError>;
    async fn delete_pending_actions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<(), StoreError>;
    async fn delete_expired_pending_actions(
        &self,
        now: OffsetDateTime,
    ) -> Result<usize, StoreError>;
}

// --- MemoryStore --- //

#[derive(Default)]
struct Collections {
    users: HashMap<UserId, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
    pending_actions: HashMap<String, PendingAction>,
}

/// In-memory [`Store`] used by tests and by deployments without a durable
/// backend. A single `RwLock` over all three collections; the guard is never
/// held across an await point, and the insert-path uniqueness check runs
/// entirely under the write lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn email_eq(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut inner = self.write();
        if inner.users.values().any(|u| email_eq(&u.email, &user.email)) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.get(id).cloned())
    }

    async fn user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let inner = self.read();
        Ok(inner
            .users
            .values()
            .find(|u| email_eq(&u.email, email))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.write();
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::UnknownUser);
        }
        let collides = inner
            .users
            .values()
            .any(|u| u.id != user.id && email_eq(&u.email, &user.email));
        if collides {
            return Err(StoreError::DuplicateEmail);
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: &UserId) -> Result<(), StoreError> {
        self.write().users.remove(id);
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token: RefreshToken,
    ) -> Result<(), StoreError> {
        self.write().refresh_tokens.insert(token.id.clone(), token);
        Ok(())
    }

    async fn refresh_token_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let inner = self.read();
        Ok(inner
            .refresh_tokens
            .values()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn delete_refresh_token(&self, id: &str) -> Result<(), StoreError> {
        self.write().refresh_tokens.remove(id);
        Ok(())
    }

    async fn delete_refresh_tokens_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        self.write()
            .refresh_tokens
            .retain(|_, t| &t.user_id != user_id);
        Ok(())
    }

    async fn delete_expired_refresh_tokens(
        &self,
        now: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        let mut inner = self.write();
        let before = inner.refresh_tokens.len();
        inner.refresh_tokens.retain(|_, t| !t.is_expired(now));
        Ok(before - inner.refresh_tokens.len())
    }

    async fn insert_pending_action(
        &self,
        action: PendingAction,
    ) -> Result<(), StoreError> {
        self.write().pending_actions.insert(action.id.clone(), action);
        Ok(())
    }

    async fn pending_action_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PendingAction>, StoreError> {
        let inner = self.read();
        Ok(inner
            .pending_actions
            .values()
            .find(|a| a.token == token)
            .cloned())
    }

    async fn pending_actions_by_payload(
        &self,
        payload: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<PendingAction>, StoreError> {
        let inner = self.read();
        Ok(inner
            .pending_actions
            .values()
            .filter(|a| a.payload == payload && !a.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete_pending_action(&self, id: &str) -> Result<(), StoreError> {
        self.write().pending_actions.remove(id);
        Ok(())
    }

    async fn delete_pending_actions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        self.write()
            .pending_actions
            .retain(|_, a| &a.user_id != user_id);
        Ok(())
    }

    async fn delete_expired_pending_actions(
        &self,
        now: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        let mut inner = self.write();
        let before = inner.pending_actions.len();
        inner.pending_actions.retain(|_, a| !a.is_expired(now));
        Ok(before - inner.pending_actions.len())
    }
}
