//! In-memory document store
//!
//! This is primarily for development and testing.
//! For shared state across processes, use RedisStore or another persistent store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::DocumentStore;
use crate::config::WriteConcern;
use crate::error::StoreError;
use crate::query::{Filter, Update};
use crate::record::{SessionKey, SessionRecord};

/// In-memory document store
///
/// Every primitive runs under the write lock, which gives the single-document
/// check-and-set semantics the coordinator relies on.
///
/// Warning: This store is not suitable for production use because:
/// - Sessions are lost on server restart
/// - Sessions are not shared across multiple server instances
/// - Expired documents stay in memory until read or purged
pub struct MemoryStore {
    documents: Arc<RwLock<HashMap<SessionKey, SessionRecord>>>,
}

impl MemoryStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Raw copy of a stored document, expired or not
    pub fn peek(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.documents.read().get(key).cloned()
    }

    /// Drop every document whose `expires_at` is not after `now`.
    /// Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|_, record| !record.is_expired(now));
        before - documents.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            documents: Arc::clone(&self.documents),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, filter: &Filter) -> Result<Option<SessionRecord>, StoreError> {
        let documents = self.documents.read();
        Ok(documents
            .get(&filter.key)
            .filter(|record| filter.matches(record))
            .cloned())
    }

    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        write_concern: &WriteConcern,
    ) -> Result<u64, StoreError> {
        let before = self.find_one_and_update(filter, update, write_concern).await?;
        Ok(u64::from(before.is_some()))
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
        _write_concern: &WriteConcern,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let mut documents = self.documents.write();
        let Some(record) = documents.get_mut(&filter.key) else {
            return Ok(None);
        };
        if !filter.matches(record) {
            return Ok(None);
        }
        let mut updated = record.clone();
        update.apply(&mut updated)?;
        Ok(Some(std::mem::replace(record, updated)))
    }

    async fn insert_one(
        &self,
        record: &SessionRecord,
        _write_concern: &WriteConcern,
    ) -> Result<(), StoreError> {
        let key = record.key();
        let mut documents = self.documents.write();
        if documents.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }
        documents.insert(key, record.clone());
        Ok(())
    }

    async fn upsert_one(
        &self,
        filter: &Filter,
        record: &SessionRecord,
        _write_concern: &WriteConcern,
    ) -> Result<(), StoreError> {
        if record.key() != filter.key {
            return Err(StoreError::Backend(format!(
                "upsert of {} under filter key {}",
                record.key(),
                filter.key
            )));
        }
        let mut documents = self.documents.write();
        let conflicting = documents
            .get(&filter.key)
            .is_some_and(|existing| !filter.matches(existing));
        if conflicting {
            return Err(StoreError::DuplicateKey(filter.key.to_string()));
        }
        documents.insert(filter.key.clone(), record.clone());
        Ok(())
    }

    async fn delete_one(
        &self,
        filter: &Filter,
        _write_concern: &WriteConcern,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.write();
        let matched = documents
            .get(&filter.key)
            .is_some_and(|record| filter.matches(record));
        if !matched {
            return Ok(0);
        }
        documents.remove(&filter.key);
        Ok(1)
    }

    async fn count(&self, scope: &str) -> Result<usize, StoreError> {
        Ok(self
            .documents
            .read()
            .keys()
            .filter(|key| key.scope == scope)
            .count())
    }

    async fn clear(&self, scope: &str) -> Result<(), StoreError> {
        self.documents.write().retain(|key, _| key.scope != scope);
        Ok(())
    }
}
