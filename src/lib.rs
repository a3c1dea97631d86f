//! # session-lock-store
//!
//! Shared session state store for a fleet of stateless request handlers.
//!
//! Every session lives in one document that carries its own pessimistic lock:
//! a held flag, a monotonically increasing lock token and the time the lock
//! was taken. Acquire, write-and-release, release, remove and touch are each a
//! single conditional update against that document, so concurrent handlers
//! never interleave on the same session and a handler holding a stale token
//! can never overwrite newer state.
//!
//! ## Features
//!
//! - **Exclusive and shared reads**: exclusive reads take the lock; shared reads
//!   claim the current token without blocking other readers
//! - **Token-authorized writes**: writes, releases and removes only land for the
//!   current lock token
//! - **Lazy expiry**: expired sessions read as absent and are deleted on access
//! - **Stale lock reclamation**: locks held past a deadline can be invalidated
//! - **Pluggable storage backends**: Redis, Memory, or any [`DocumentStore`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use session_lock_store::{
//!     ItemLookup, JsonCodec, MemoryStore, SessionItems, SessionLockCoordinator,
//!     SessionStoreConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), session_lock_store::SessionError> {
//!     let coordinator = SessionLockCoordinator::new(
//!         MemoryStore::new(),
//!         JsonCodec::<SessionItems>::new(),
//!         SessionStoreConfig::new("/shop"),
//!     )?;
//!
//!     let id = coordinator.generate_session_id();
//!     coordinator.create_uninitialized_item(&id, 20).await?;
//!
//!     if let ItemLookup::Acquired { mut data, lock_token, .. } =
//!         coordinator.get_item_exclusive(&id).await?
//!     {
//!         data.items.set("cart", vec!["book"]);
//!         coordinator.set_and_release_item(&id, lock_token, &data, false).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod query;
pub mod record;
pub mod repository;
pub mod session;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{FnCodec, JsonCodec, SessionCodec};
pub use config::{SessionStoreConfig, WriteConcern};
pub use coordinator::{ItemLookup, SessionLockCoordinator, WriteOutcome};
pub use error::{SessionError, SessionResult, StoreError};
pub use record::{LockToken, PendingAction, SessionKey, SessionRecord};
pub use repository::SessionRepository;
pub use session::{SessionItems, SessionStateData};
pub use store::{DocumentStore, MemoryStore};

#[cfg(feature = "redis-store")]
pub use store::RedisStore;
