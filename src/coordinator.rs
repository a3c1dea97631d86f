//! Session lock coordinator.
//!
//! Implements the acquire / release / expire protocol on top of a
//! [`SessionRepository`]. Every lock transition is one conditional update on
//! the session document; there is no in-process locking and nothing is
//! cached between calls. Contention and stale tokens are ordinary results
//! ([`ItemLookup::Locked`], [`WriteOutcome::NoMatch`]); the caller decides
//! whether to poll, give up or reclaim a stale lock.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::codec::{decode_payload, encode_payload, SessionCodec};
use crate::config::SessionStoreConfig;
use crate::error::{SessionError, SessionResult, StoreError};
use crate::record::{minutes, LockToken, PendingAction, SessionRecord};
use crate::repository::SessionRepository;
use crate::session::SessionStateData;
use crate::store::DocumentStore;

/// Result of reading a session
#[derive(Debug, Clone, PartialEq)]
pub enum ItemLookup<T> {
    /// No such session, or it had expired (and has been purged)
    Absent,
    /// Someone else holds the lock; retry later with this information
    Locked {
        lock_age: Duration,
        lock_token: LockToken,
    },
    /// The caller now owns `lock_token` and must present it to write or release
    Acquired {
        data: SessionStateData<T>,
        lock_age: Duration,
        lock_token: LockToken,
        pending_action: PendingAction,
    },
}

impl<T> ItemLookup<T> {
    pub fn is_locked(&self) -> bool {
        matches!(self, ItemLookup::Locked { .. })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ItemLookup::Absent)
    }

    pub fn lock_token(&self) -> Option<LockToken> {
        match self {
            ItemLookup::Absent => None,
            ItemLookup::Locked { lock_token, .. } | ItemLookup::Acquired { lock_token, .. } => {
                Some(*lock_token)
            }
        }
    }

    pub fn lock_age(&self) -> Option<Duration> {
        match self {
            ItemLookup::Absent => None,
            ItemLookup::Locked { lock_age, .. } | ItemLookup::Acquired { lock_age, .. } => {
                Some(*lock_age)
            }
        }
    }

    pub fn pending_action(&self) -> PendingAction {
        match self {
            ItemLookup::Acquired { pending_action, .. } => *pending_action,
            _ => PendingAction::None,
        }
    }

    pub fn data(&self) -> Option<&SessionStateData<T>> {
        match self {
            ItemLookup::Acquired { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<SessionStateData<T>> {
        match self {
            ItemLookup::Acquired { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Result of a token- or id-guarded write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The document matched and was changed
    Applied,
    /// Nothing matched: the token is stale or the session is gone
    NoMatch,
}

impl WriteOutcome {
    fn from_affected(affected: u64) -> Self {
        if affected > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::NoMatch
        }
    }

    pub fn is_applied(self) -> bool {
        self == WriteOutcome::Applied
    }
}

/// Session state store with document-embedded pessimistic locking
pub struct SessionLockCoordinator<S: DocumentStore, C: SessionCodec> {
    repository: SessionRepository<S>,
    codec: Arc<C>,
    clock: Arc<dyn Clock>,
    config: SessionStoreConfig,
}

impl<S: DocumentStore, C: SessionCodec> Clone for SessionLockCoordinator<S, C> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            codec: Arc::clone(&self.codec),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S: DocumentStore, C: SessionCodec> SessionLockCoordinator<S, C> {
    /// Create a coordinator over `store`, validating `config`
    pub fn new(store: S, codec: C, config: SessionStoreConfig) -> SessionResult<Self> {
        config.validate()?;
        Ok(Self {
            repository: SessionRepository::new(
                store,
                config.scope.clone(),
                config.write_concern.clone(),
            ),
            codec: Arc::new(codec),
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    pub fn repository(&self) -> &SessionRepository<S> {
        &self.repository
    }

    /// Generate a new session ID
    pub fn generate_session_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Fresh, empty session state for the current request
    pub fn create_new_store_data(&self, timeout_minutes: u32) -> SessionStateData<C::Items> {
        SessionStateData::empty(timeout_minutes)
    }

    /// Expiry notifications are not available from a shared store
    pub fn supports_expire_callback(&self) -> bool {
        false
    }

    /// Read a session without asking for the exclusive lock
    pub async fn get_item(&self, id: &str) -> SessionResult<ItemLookup<C::Items>> {
        self.acquire_for_read(id, false).await
    }

    /// Read a session and take its exclusive lock
    pub async fn get_item_exclusive(&self, id: &str) -> SessionResult<ItemLookup<C::Items>> {
        self.acquire_for_read(id, true).await
    }

    async fn acquire_for_read(
        &self,
        id: &str,
        exclusive: bool,
    ) -> SessionResult<ItemLookup<C::Items>> {
        let action = if exclusive { "get_item_exclusive" } else { "get_item" };
        let now = self.clock.now();

        if exclusive {
            let locked = self
                .repository
                .lock_if_available(id, now)
                .await
                .map_err(|e| self.surface(action, e))?;
            if let Some(before) = locked {
                let lock_token = before.lock_token.next();
                debug!(session_id = id, %lock_token, "session lock acquired");
                return Ok(ItemLookup::Acquired {
                    data: self.materialize(&before)?,
                    lock_age: Duration::zero(),
                    lock_token,
                    pending_action: before.pending_action,
                });
            }
        }

        let record = match self
            .repository
            .find(id)
            .await
            .map_err(|e| self.surface(action, e))?
        {
            Some(record) => record,
            None => return Ok(ItemLookup::Absent),
        };

        if record.is_expired(now) {
            self.repository
                .delete_expired(id, now)
                .await
                .map_err(|e| self.surface(action, e))?;
            debug!(session_id = id, expires_at = %record.expires_at, "expired session purged");
            return Ok(ItemLookup::Absent);
        }

        let lock_age = record.lock_age(now);
        if exclusive || record.lock_held {
            debug!(
                session_id = id,
                lock_token = %record.lock_token,
                lock_age_ms = lock_age.num_milliseconds(),
                "session is locked"
            );
            return Ok(ItemLookup::Locked {
                lock_age,
                lock_token: record.lock_token,
            });
        }

        let claimed = self
            .repository
            .claim_unlocked(id, record.lock_token)
            .await
            .map_err(|e| self.surface(action, e))?;
        if claimed == 0 {
            debug!(session_id = id, "session changed while reading, reporting locked");
            return Ok(ItemLookup::Locked {
                lock_age,
                lock_token: record.lock_token,
            });
        }

        Ok(ItemLookup::Acquired {
            data: self.materialize(&record)?,
            lock_age,
            lock_token: record.lock_token.next(),
            pending_action: record.pending_action,
        })
    }

    fn materialize(&self, record: &SessionRecord) -> SessionResult<SessionStateData<C::Items>> {
        match record.pending_action {
            PendingAction::Initialize => {
                Ok(self.create_new_store_data(self.config.default_timeout_minutes))
            }
            PendingAction::None => Ok(SessionStateData::new(
                decode_payload(self.codec.as_ref(), &record.payload)?,
                record.timeout_minutes,
            )),
        }
    }

    /// Reserve `id` with an empty placeholder record.
    ///
    /// Fails with [`SessionError::DuplicateSession`] if the id is taken.
    pub async fn create_uninitialized_item(
        &self,
        id: &str,
        timeout_minutes: u32,
    ) -> SessionResult<()> {
        let now = self.clock.now();
        let record = SessionRecord::placeholder(&self.repository.key(id), now, timeout_minutes);
        match self.repository.insert(&record).await {
            Ok(()) => {
                debug!(session_id = id, timeout_minutes, "placeholder session created");
                Ok(())
            }
            Err(StoreError::DuplicateKey(_)) => {
                warn!(session_id = id, "placeholder collides with an existing session");
                Err(SessionError::DuplicateSession { id: id.to_string() })
            }
            Err(e) => Err(self.surface("create_uninitialized_item", e)),
        }
    }

    /// Write the session and release the caller's lock.
    ///
    /// With `is_new` the full record is written unconditionally. Otherwise
    /// the write only lands if `lock_token` is still the document's token
    /// and the session has not expired; otherwise the result is
    /// [`WriteOutcome::NoMatch`] and nothing changes.
    pub async fn set_and_release_item(
        &self,
        id: &str,
        lock_token: LockToken,
        data: &SessionStateData<C::Items>,
        is_new: bool,
    ) -> SessionResult<WriteOutcome> {
        const ACTION: &str = "set_and_release_item";
        let payload = encode_payload(self.codec.as_ref(), &data.items)?;
        let now = self.clock.now();

        if is_new {
            let record = SessionRecord::materialized(
                &self.repository.key(id),
                now,
                data.timeout_minutes,
                payload,
            );
            self.repository
                .upsert(&record)
                .await
                .map_err(|e| self.surface(ACTION, e))?;
            debug!(session_id = id, "new session written");
            return Ok(WriteOutcome::Applied);
        }

        let affected = self
            .repository
            .write_and_unlock(
                id,
                lock_token,
                now,
                payload,
                now + minutes(data.timeout_minutes),
                data.timeout_minutes,
            )
            .await
            .map_err(|e| self.surface(ACTION, e))?;
        let outcome = WriteOutcome::from_affected(affected);
        match outcome {
            WriteOutcome::Applied => {
                debug!(session_id = id, %lock_token, "session written and released")
            }
            WriteOutcome::NoMatch => {
                debug!(
                    session_id = id,
                    %lock_token,
                    "stale lock token or expired session, write dropped"
                )
            }
        }
        Ok(outcome)
    }

    /// Release the caller's lock without writing
    pub async fn release_item(
        &self,
        id: &str,
        lock_token: LockToken,
    ) -> SessionResult<WriteOutcome> {
        let now = self.clock.now();
        let affected = self
            .repository
            .unlock(id, lock_token, now, now + self.config.default_timeout())
            .await
            .map_err(|e| self.surface("release_item", e))?;
        debug!(session_id = id, %lock_token, affected, "session lock released");
        Ok(WriteOutcome::from_affected(affected))
    }

    /// Delete the session if the caller still holds `lock_token`
    pub async fn remove_item(
        &self,
        id: &str,
        lock_token: LockToken,
    ) -> SessionResult<WriteOutcome> {
        let affected = self
            .repository
            .delete_with_token(id, lock_token)
            .await
            .map_err(|e| self.surface("remove_item", e))?;
        debug!(session_id = id, %lock_token, affected, "session removed");
        Ok(WriteOutcome::from_affected(affected))
    }

    /// Extend the session's life by the default timeout, locked or not.
    /// An expired session stays expired.
    pub async fn reset_item_timeout(&self, id: &str) -> SessionResult<WriteOutcome> {
        let now = self.clock.now();
        let affected = self
            .repository
            .extend(id, now, now + self.config.default_timeout())
            .await
            .map_err(|e| self.surface("reset_item_timeout", e))?;
        Ok(WriteOutcome::from_affected(affected))
    }

    /// Invalidate a lock held for at least `max_age`.
    ///
    /// The token is bumped, so the original holder's eventual write or
    /// release becomes a no-op.
    pub async fn reclaim_stale_lock(
        &self,
        id: &str,
        max_age: Duration,
    ) -> SessionResult<WriteOutcome> {
        let now = self.clock.now();
        let reclaimed = self
            .repository
            .reclaim_lock(id, now - max_age)
            .await
            .map_err(|e| self.surface("reclaim_stale_lock", e))?;
        match reclaimed {
            Some(before) => {
                warn!(
                    session_id = id,
                    stale_token = %before.lock_token,
                    lock_age_ms = before.lock_age(now).num_milliseconds(),
                    "stale session lock reclaimed"
                );
                Ok(WriteOutcome::Applied)
            }
            None => Ok(WriteOutcome::NoMatch),
        }
    }

    /// Log-and-mask or propagate a store failure, per configuration
    fn surface(&self, action: &'static str, err: StoreError) -> SessionError {
        if !self.config.log_failures {
            return SessionError::Store(err);
        }
        error!(
            action,
            scope = %self.config.scope,
            error = %err,
            "An exception occurred communicating with the data source"
        );
        SessionError::Provider { action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::JsonCodec;
    use crate::config::WriteConcern;
    use crate::query::{Filter, Update};
    use crate::session::SessionItems;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use tokio_test::assert_ok;

    type Coordinator<S = MemoryStore> = SessionLockCoordinator<S, JsonCodec<SessionItems>>;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn setup() -> (Coordinator, MemoryStore, Arc<ManualClock>) {
        init_tracing();
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_now());
        let coordinator = SessionLockCoordinator::new(
            store.clone(),
            JsonCodec::new(),
            SessionStoreConfig::new("/app"),
        )
        .unwrap()
        .with_clock(clock.clone());
        (coordinator, store, clock)
    }

    fn items(key: &str, value: &str) -> SessionItems {
        let mut items = SessionItems::new();
        items.set(key, value);
        items
    }

    #[tokio::test]
    async fn test_placeholder_write_read_cycle() {
        let (coordinator, _, _) = setup();
        assert_ok!(coordinator.create_uninitialized_item("S1", 20).await);

        let lookup = coordinator.get_item_exclusive("S1").await.unwrap();
        assert_eq!(lookup.pending_action(), PendingAction::Initialize);
        assert_eq!(lookup.lock_token(), Some(LockToken(1)));
        let data = lookup.into_data().unwrap();
        assert!(data.items.is_empty());
        assert_eq!(data.timeout_minutes, 20);

        let written = SessionStateData::new(items("user", "P1"), 20);
        let outcome = coordinator
            .set_and_release_item("S1", LockToken(1), &written, false)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);

        let read = coordinator.get_item("S1").await.unwrap();
        assert!(!read.is_locked());
        assert_eq!(read.pending_action(), PendingAction::None);
        let data = read.into_data().unwrap();
        assert_eq!(data.items.get::<String>("user"), Some("P1".to_string()));
        assert!(!data.items.is_dirty());
    }

    #[tokio::test]
    async fn test_second_exclusive_acquire_sees_lock() {
        let (coordinator, _, clock) = setup();
        coordinator.create_uninitialized_item("S2", 20).await.unwrap();

        let first = coordinator.get_item_exclusive("S2").await.unwrap();
        assert!(matches!(first, ItemLookup::Acquired { .. }));

        clock.advance(Duration::seconds(3));
        let second = coordinator.get_item_exclusive("S2").await.unwrap();
        assert_eq!(
            second,
            ItemLookup::Locked {
                lock_age: Duration::seconds(3),
                lock_token: LockToken(1),
            }
        );
        assert!(second.data().is_none());

        let shared = coordinator.get_item("S2").await.unwrap();
        assert!(shared.is_locked());
    }

    #[tokio::test]
    async fn test_expired_session_is_absent_and_purged() {
        let (coordinator, store, clock) = setup();
        coordinator.create_uninitialized_item("S3", 20).await.unwrap();
        coordinator.get_item_exclusive("S3").await.unwrap();

        clock.advance(Duration::minutes(21));
        let lookup = coordinator.get_item("S3").await.unwrap();
        assert!(lookup.is_absent());
        assert!(store.peek(&coordinator.repository().key("S3")).is_none());

        assert!(coordinator.get_item_exclusive("S3").await.unwrap().is_absent());
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_dead() {
        let (coordinator, store, clock) = setup();
        coordinator.create_uninitialized_item("edge", 1).await.unwrap();

        clock.advance(Duration::minutes(1));
        assert!(coordinator.get_item_exclusive("edge").await.unwrap().is_absent());
        assert!(store.peek(&coordinator.repository().key("edge")).is_none());
    }

    #[tokio::test]
    async fn test_expired_session_rejects_late_writes() {
        let (coordinator, store, clock) = setup();
        coordinator.create_uninitialized_item("E1", 20).await.unwrap();
        coordinator.create_uninitialized_item("E2", 20).await.unwrap();
        let token = coordinator
            .get_item_exclusive("E1")
            .await
            .unwrap()
            .lock_token()
            .unwrap();
        let e1 = coordinator.repository().key("E1");
        let before = store.peek(&e1).unwrap();

        clock.advance(Duration::minutes(25));
        let late = SessionStateData::new(items("from", "late"), 20);
        assert_eq!(
            coordinator
                .set_and_release_item("E1", token, &late, false)
                .await
                .unwrap(),
            WriteOutcome::NoMatch
        );
        assert_eq!(
            coordinator.release_item("E1", token).await.unwrap(),
            WriteOutcome::NoMatch
        );
        assert_eq!(
            coordinator.reset_item_timeout("E2").await.unwrap(),
            WriteOutcome::NoMatch
        );

        let after = store.peek(&e1).unwrap();
        assert_eq!(after.payload, before.payload);
        assert_eq!(after.expires_at, before.expires_at);

        assert!(coordinator.get_item("E1").await.unwrap().is_absent());
        assert!(coordinator.get_item("E2").await.unwrap().is_absent());
        assert!(store.peek(&e1).is_none());
    }

    #[tokio::test]
    async fn test_missing_session_is_absent() {
        let (coordinator, _, _) = setup();
        assert!(coordinator.get_item("nope").await.unwrap().is_absent());
        assert!(coordinator.get_item_exclusive("nope").await.unwrap().is_absent());
        assert_eq!(
            coordinator.reset_item_timeout("nope").await.unwrap(),
            WriteOutcome::NoMatch
        );
    }

    #[tokio::test]
    async fn test_stale_token_write_is_noop() {
        let (coordinator, store, clock) = setup();
        let first = SessionStateData::new(items("v", "one"), 20);
        coordinator
            .set_and_release_item("S4", LockToken(0), &first, true)
            .await
            .unwrap();
        let key = coordinator.repository().key("S4");
        let before = store.peek(&key).unwrap();

        let lookup = coordinator.get_item_exclusive("S4").await.unwrap();
        assert_eq!(lookup.lock_token(), Some(LockToken(1)));

        clock.advance(Duration::minutes(1));
        let second = SessionStateData::new(items("v", "two"), 20);
        let outcome = coordinator
            .set_and_release_item("S4", LockToken(0), &second, false)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::NoMatch);

        let after = store.peek(&key).unwrap();
        assert_eq!(after.payload, before.payload);
        assert_eq!(after.expires_at, before.expires_at);
        assert!(after.lock_held);
    }

    #[tokio::test]
    async fn test_reclaimed_lock_drops_original_write() {
        let (coordinator, store, clock) = setup();
        coordinator.create_uninitialized_item("S5", 20).await.unwrap();
        let holder = coordinator.get_item_exclusive("S5").await.unwrap();
        let holder_token = holder.lock_token().unwrap();

        clock.advance(Duration::seconds(30));
        assert_eq!(
            coordinator
                .reclaim_stale_lock("S5", Duration::minutes(1))
                .await
                .unwrap(),
            WriteOutcome::NoMatch
        );

        clock.advance(Duration::seconds(90));
        let waiting = coordinator.get_item_exclusive("S5").await.unwrap();
        let lock_age = waiting.lock_age().unwrap();
        assert!(lock_age >= Duration::minutes(1));
        assert_eq!(
            coordinator.reclaim_stale_lock("S5", Duration::minutes(1)).await.unwrap(),
            WriteOutcome::Applied
        );

        let fresh = coordinator.get_item_exclusive("S5").await.unwrap();
        let fresh_token = fresh.lock_token().unwrap();
        assert!(fresh_token > holder_token);

        let late = SessionStateData::new(items("from", "holder"), 20);
        assert_eq!(
            coordinator
                .set_and_release_item("S5", holder_token, &late, false)
                .await
                .unwrap(),
            WriteOutcome::NoMatch
        );

        let winner = SessionStateData::new(items("from", "fresh"), 20);
        assert!(coordinator
            .set_and_release_item("S5", fresh_token, &winner, false)
            .await
            .unwrap()
            .is_applied());
        let stored = store.peek(&coordinator.repository().key("S5")).unwrap();
        assert!(!stored.lock_held);
        let data = coordinator.get_item("S5").await.unwrap().into_data().unwrap();
        assert_eq!(data.items.get::<String>("from"), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_touch_advances_expiry_only() {
        let (coordinator, store, clock) = setup();
        let data = SessionStateData::new(items("k", "v"), 5);
        coordinator
            .set_and_release_item("S6", LockToken(0), &data, true)
            .await
            .unwrap();
        coordinator.get_item_exclusive("S6").await.unwrap();
        let key = coordinator.repository().key("S6");
        let before = store.peek(&key).unwrap();

        clock.advance(Duration::minutes(3));
        let outcome = coordinator.reset_item_timeout("S6").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);

        let after = store.peek(&key).unwrap();
        assert_eq!(after.expires_at, clock.now() + Duration::minutes(20));
        assert_eq!(after.payload, before.payload);
        assert_eq!(after.lock_token, before.lock_token);
        assert!(after.lock_held);
    }

    #[tokio::test]
    async fn test_release_and_remove_require_token() {
        let (coordinator, store, clock) = setup();
        coordinator.create_uninitialized_item("S7", 20).await.unwrap();
        let token = coordinator
            .get_item_exclusive("S7")
            .await
            .unwrap()
            .lock_token()
            .unwrap();
        let key = coordinator.repository().key("S7");

        assert_eq!(
            coordinator.release_item("S7", LockToken(99)).await.unwrap(),
            WriteOutcome::NoMatch
        );
        assert!(store.peek(&key).unwrap().lock_held);

        clock.advance(Duration::minutes(2));
        assert!(coordinator.release_item("S7", token).await.unwrap().is_applied());
        let released = store.peek(&key).unwrap();
        assert!(!released.lock_held);
        assert_eq!(released.expires_at, clock.now() + Duration::minutes(20));
        assert_eq!(released.pending_action, PendingAction::None);

        assert_eq!(
            coordinator.remove_item("S7", LockToken(0)).await.unwrap(),
            WriteOutcome::NoMatch
        );
        assert!(coordinator.remove_item("S7", token).await.unwrap().is_applied());
        assert!(store.peek(&key).is_none());
    }

    #[tokio::test]
    async fn test_shared_read_claims_token() {
        let (coordinator, store, _) = setup();
        let data = SessionStateData::new(items("a", "b"), 20);
        coordinator
            .set_and_release_item("S8", LockToken(0), &data, true)
            .await
            .unwrap();

        let first = coordinator.get_item("S8").await.unwrap();
        let second = coordinator.get_item("S8").await.unwrap();
        assert_eq!(first.lock_token(), Some(LockToken(1)));
        assert_eq!(second.lock_token(), Some(LockToken(2)));
        assert!(!store.peek(&coordinator.repository().key("S8")).unwrap().lock_held);
    }

    #[tokio::test]
    async fn test_duplicate_placeholder_is_error() {
        let (coordinator, _, _) = setup();
        coordinator.create_uninitialized_item("dup", 20).await.unwrap();
        let err = coordinator.create_uninitialized_item("dup", 20).await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateSession { ref id } if id == "dup"));
    }

    #[tokio::test]
    async fn test_new_item_overwrites_existing_record() {
        let (coordinator, store, _) = setup();
        coordinator.create_uninitialized_item("S9", 20).await.unwrap();
        coordinator.get_item_exclusive("S9").await.unwrap();

        let data = SessionStateData::new(items("x", "y"), 10);
        coordinator
            .set_and_release_item("S9", LockToken(0), &data, true)
            .await
            .unwrap();

        let stored = store.peek(&coordinator.repository().key("S9")).unwrap();
        assert_eq!(stored.lock_token, LockToken(0));
        assert!(!stored.lock_held);
        assert_eq!(stored.timeout_minutes, 10);
        assert_eq!(stored.pending_action, PendingAction::None);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let (coordinator, store, _) = setup();
        let other = SessionLockCoordinator::new(
            store.clone(),
            JsonCodec::<SessionItems>::new(),
            SessionStoreConfig::new("/other"),
        )
        .unwrap();

        coordinator.create_uninitialized_item("shared-id", 20).await.unwrap();
        assert!(other.get_item("shared-id").await.unwrap().is_absent());
        assert_ok!(other.create_uninitialized_item("shared-id", 20).await);
        assert_eq!(store.count("/app").await.unwrap(), 1);
        assert_eq!(store.count("/other").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_exclusive_acquire_has_one_winner() {
        let (coordinator, _, _) = setup();
        coordinator.create_uninitialized_item("race", 20).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.get_item_exclusive("race").await })
            })
            .collect();

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ItemLookup::Acquired { .. } => winners += 1,
                ItemLookup::Locked { .. } => losers += 1,
                ItemLookup::Absent => panic!("session vanished during the race"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(losers, 15);
    }

    #[tokio::test]
    async fn test_corrupt_payload_surfaces_codec_error() {
        let (coordinator, store, clock) = setup();
        let key = coordinator.repository().key("bad");
        let record = SessionRecord::materialized(&key, clock.now(), 20, "!!".to_string());
        store.insert_one(&record, &WriteConcern::default()).await.unwrap();

        let err = coordinator.get_item("bad").await.unwrap_err();
        assert!(matches!(err, SessionError::Codec(_)));
    }

    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn find_one(&self, _: &Filter) -> Result<Option<SessionRecord>, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn update_one(
            &self,
            _: &Filter,
            _: &Update,
            _: &WriteConcern,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn find_one_and_update(
            &self,
            _: &Filter,
            _: &Update,
            _: &WriteConcern,
        ) -> Result<Option<SessionRecord>, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn insert_one(&self, _: &SessionRecord, _: &WriteConcern) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn upsert_one(
            &self,
            _: &Filter,
            _: &SessionRecord,
            _: &WriteConcern,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn delete_one(&self, _: &Filter, _: &WriteConcern) -> Result<u64, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_propagate_or_mask() {
        init_tracing();
        let raw: Coordinator<FailingStore> = SessionLockCoordinator::new(
            FailingStore,
            JsonCodec::new(),
            SessionStoreConfig::new("/app"),
        )
        .unwrap();
        let err = raw.get_item_exclusive("x").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Backend(_))));

        let masked: Coordinator<FailingStore> = SessionLockCoordinator::new(
            FailingStore,
            JsonCodec::new(),
            SessionStoreConfig::new("/app").with_log_failures(true),
        )
        .unwrap();
        let err = masked.release_item("x", LockToken(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::Provider { action: "release_item" }));
        assert!(!err.to_string().contains("connection refused"));

        let err = masked.create_uninitialized_item("x", 20).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider { action: "create_uninitialized_item" }
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SessionLockCoordinator::new(
            MemoryStore::new(),
            JsonCodec::<SessionItems>::new(),
            SessionStoreConfig::new("/app").with_default_timeout(0),
        );
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_store_data_and_ids() {
        let (coordinator, _, _) = setup();
        let data = coordinator.create_new_store_data(45);
        assert!(data.items.is_empty());
        assert_eq!(data.timeout_minutes, 45);
        assert!(!coordinator.supports_expire_callback());
        assert_ne!(coordinator.generate_session_id(), coordinator.generate_session_id());
    }
}
