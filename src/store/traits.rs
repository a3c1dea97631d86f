//! Document store trait

use async_trait::async_trait;

use crate::config::WriteConcern;
use crate::error::StoreError;
use crate::query::{Filter, Update};
use crate::record::SessionRecord;

/// Trait for session document backends
///
/// Every primitive touches at most the one document named by the filter key,
/// and must be atomic with respect to that document: a conditional operation
/// either applies to the document state it matched or does nothing.
/// Counts let callers tell "lost a race" apart from "nothing there".
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch the document matching the filter
    async fn find_one(&self, filter: &Filter) -> Result<Option<SessionRecord>, StoreError>;

    /// Apply `update` if the document matches; returns documents affected (0 or 1)
    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        write_concern: &WriteConcern,
    ) -> Result<u64, StoreError>;

    /// Apply `update` if the document matches and return it as it was
    /// before the update
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
        write_concern: &WriteConcern,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Insert a new document
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the key is taken
    async fn insert_one(
        &self,
        record: &SessionRecord,
        write_concern: &WriteConcern,
    ) -> Result<(), StoreError>;

    /// Replace the document matching the filter, or insert it if the key is free
    async fn upsert_one(
        &self,
        filter: &Filter,
        record: &SessionRecord,
        write_concern: &WriteConcern,
    ) -> Result<(), StoreError>;

    /// Delete the document if it matches; returns documents affected (0 or 1)
    async fn delete_one(
        &self,
        filter: &Filter,
        write_concern: &WriteConcern,
    ) -> Result<u64, StoreError>;

    /// Count documents in a scope, expired ones included (optional)
    async fn count(&self, _scope: &str) -> Result<usize, StoreError> {
        Err(StoreError::NotSupported("count"))
    }

    /// Delete every document in a scope (optional)
    async fn clear(&self, _scope: &str) -> Result<(), StoreError> {
        Err(StoreError::NotSupported("clear"))
    }
}
