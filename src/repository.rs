//! Session record repository.
//!
//! Turns each protocol step into one store primitive: it builds the filter
//! and the field updates, attaches the configured write concern and returns
//! raw counts or documents. Deciding what a count of zero means is left to
//! the [`SessionLockCoordinator`](crate::SessionLockCoordinator).

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::WriteConcern;
use crate::error::StoreError;
use crate::query::{Field, Filter, Update};
use crate::record::{LockToken, PendingAction, SessionKey, SessionRecord};
use crate::store::DocumentStore;

pub struct SessionRepository<S: DocumentStore> {
    store: Arc<S>,
    scope: String,
    write_concern: WriteConcern,
}

impl<S: DocumentStore> Clone for SessionRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scope: self.scope.clone(),
            write_concern: self.write_concern.clone(),
        }
    }
}

impl<S: DocumentStore> SessionRepository<S> {
    pub fn new<T: Into<String>>(store: S, scope: T, write_concern: WriteConcern) -> Self {
        Self {
            store: Arc::new(store),
            scope: scope.into(),
            write_concern,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn key(&self, id: &str) -> SessionKey {
        SessionKey::new(id, self.scope.as_str())
    }

    fn by_id(&self, id: &str) -> Filter {
        Filter::by_key(self.key(id))
    }

    fn by_token(&self, id: &str, token: LockToken) -> Filter {
        self.by_id(id).eq(Field::LockToken, token)
    }

    /// Current document, whatever its state
    pub async fn find(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.store.find_one(&self.by_id(id)).await
    }

    /// Take the lock on an alive, unlocked document. Bumps the token and
    /// clears the pending action in the same step. Returns the document as
    /// it was before, or `None` if nothing matched.
    pub async fn lock_if_available(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let filter = self
            .by_id(id)
            .eq(Field::LockHeld, false)
            .gt(Field::ExpiresAt, now);
        let update = Update::new()
            .set(Field::LockHeld, true)
            .set(Field::LockAcquiredAt, now)
            .set(Field::PendingAction, PendingAction::None)
            .inc(Field::LockToken, 1);
        self.store
            .find_one_and_update(&filter, &update, &self.write_concern)
            .await
    }

    /// Claim an unlocked document for a shared reader: move the token from
    /// `observed` to `observed + 1` and clear the pending action
    pub async fn claim_unlocked(&self, id: &str, observed: LockToken) -> Result<u64, StoreError> {
        let filter = self.by_token(id, observed).eq(Field::LockHeld, false);
        let update = Update::new()
            .set(Field::LockToken, observed.next())
            .set(Field::PendingAction, PendingAction::None);
        self.store
            .update_one(&filter, &update, &self.write_concern)
            .await
    }

    /// Delete the document only if it is still expired at `now`
    pub async fn delete_expired(&self, id: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let filter = self.by_id(id).lte(Field::ExpiresAt, now);
        self.store.delete_one(&filter, &self.write_concern).await
    }

    pub async fn insert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.store.insert_one(record, &self.write_concern).await
    }

    pub async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let filter = Filter::by_key(record.key());
        self.store
            .upsert_one(&filter, record, &self.write_concern)
            .await
    }

    /// Filter on `token` for a document still alive at `now`
    fn alive_with_token(&self, id: &str, token: LockToken, now: DateTime<Utc>) -> Filter {
        self.by_token(id, token).gt(Field::ExpiresAt, now)
    }

    /// Write the payload and release the lock identified by `token`.
    /// An expired document is left alone.
    pub async fn write_and_unlock(
        &self,
        id: &str,
        token: LockToken,
        now: DateTime<Utc>,
        payload: String,
        expires_at: DateTime<Utc>,
        timeout_minutes: u32,
    ) -> Result<u64, StoreError> {
        let filter = self.alive_with_token(id, token, now);
        let update = Update::new()
            .set(Field::Payload, payload)
            .set(Field::ExpiresAt, expires_at)
            .set(Field::TimeoutMinutes, timeout_minutes)
            .set(Field::LockHeld, false);
        self.store
            .update_one(&filter, &update, &self.write_concern)
            .await
    }

    /// Release the lock identified by `token`, leaving the payload alone
    pub async fn unlock(
        &self,
        id: &str,
        token: LockToken,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let filter = self.alive_with_token(id, token, now);
        let update = Update::new()
            .set(Field::LockHeld, false)
            .set(Field::ExpiresAt, expires_at);
        self.store
            .update_one(&filter, &update, &self.write_concern)
            .await
    }

    pub async fn delete_with_token(&self, id: &str, token: LockToken) -> Result<u64, StoreError> {
        self.store
            .delete_one(&self.by_token(id, token), &self.write_concern)
            .await
    }

    /// Push `expires_at` out regardless of lock state, if still alive at `now`
    pub async fn extend(
        &self,
        id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let filter = self.by_id(id).gt(Field::ExpiresAt, now);
        let update = Update::new().set(Field::ExpiresAt, expires_at);
        self.store
            .update_one(&filter, &update, &self.write_concern)
            .await
    }

    /// Invalidate a lock taken at or before `stale_before`. Returns the
    /// document as it was, so callers can report the reclaimed token.
    pub async fn reclaim_lock(
        &self,
        id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let filter = self
            .by_id(id)
            .eq(Field::LockHeld, true)
            .lte(Field::LockAcquiredAt, stale_before);
        let update = Update::new()
            .set(Field::LockHeld, false)
            .inc(Field::LockToken, 1);
        self.store
            .find_one_and_update(&filter, &update, &self.write_concern)
            .await
    }
}
