//! Redis document store
//!
//! Storage format:
//! - Key: `database:collection:scope:id`
//! - Value: JSON encoded [`SessionRecord`]
//! - TTL: `PEXPIREAT` a grace period after `expires_at`, so Redis reaps
//!   abandoned documents without help
//!
//! Conditional primitives run as Lua scripts. The filter and the update are
//! passed as JSON and evaluated server side, so matching and writing happen
//! in one atomic step.

use async_trait::async_trait;
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::Arc;

use super::DocumentStore;
use crate::config::{SessionStoreConfig, WriteConcern};
use crate::error::StoreError;
use crate::query::{Filter, Update};
use crate::record::{SessionKey, SessionRecord};

const LUA_PRELUDE: &str = r#"
local function matches(doc, filter)
  if doc.id ~= filter.key.id or doc.scope ~= filter.key.scope then
    return false
  end
  for _, p in ipairs(filter.predicates) do
    local v = doc[p.field]
    if type(v) ~= type(p.value) then return false end
    if p.op == 'eq' then
      if v ~= p.value then return false end
    elseif p.op == 'lt' then
      if not (v < p.value) then return false end
    elseif p.op == 'lte' then
      if not (v <= p.value) then return false end
    elseif p.op == 'gt' then
      if not (v > p.value) then return false end
    elseif p.op == 'gte' then
      if not (v >= p.value) then return false end
    else
      error('unknown comparison ' .. tostring(p.op))
    end
  end
  return true
end

local function apply(doc, update)
  for _, u in ipairs(update) do
    if u.op == 'set' then
      doc[u.field] = u.value
    elseif u.op == 'inc' then
      doc[u.field] = doc[u.field] + u.by
    end
  end
end
"#;

// KEYS[1] = document, ARGV = filter, update, reap grace ms.
// Returns the document as it was before the update, or nil.
const FIND_AND_UPDATE: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return false end
local doc = cjson.decode(raw)
if not matches(doc, cjson.decode(ARGV[1])) then return false end
apply(doc, cjson.decode(ARGV[2]))
redis.call('SET', KEYS[1], cjson.encode(doc))
redis.call('PEXPIREAT', KEYS[1], doc.expires_at + tonumber(ARGV[3]))
return raw
"#;

// KEYS[1] = document, ARGV = filter. Returns 1 if deleted.
const DELETE_ONE: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
if not matches(cjson.decode(raw), cjson.decode(ARGV[1])) then return 0 end
return redis.call('DEL', KEYS[1])
"#;

// KEYS[1] = document, ARGV = filter, replacement json, pexpireat ms.
// Returns 0 when a non-matching document occupies the key.
const UPSERT_ONE: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw and not matches(cjson.decode(raw), cjson.decode(ARGV[1])) then return 0 end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('PEXPIREAT', KEYS[1], tonumber(ARGV[3]))
return 1
"#;

/// Redis document store
///
/// # Example
///
/// ```rust,ignore
/// use session_lock_store::{RedisStore, SessionStoreConfig};
///
/// let config = SessionStoreConfig::new("/shop");
/// let store = RedisStore::from_url("redis://127.0.0.1/", &config).await?;
/// ```
pub struct RedisStore {
    conn: Arc<ConnectionManager>,
    namespace: String,
    reap_grace: Duration,
    find_and_update: Script,
    delete_one: Script,
    upsert_one: Script,
}

impl RedisStore {
    /// Create a new Redis store for the configured database and collection
    ///
    /// - Reap grace: 1 hour
    pub async fn new(
        client: redis::Client,
        config: &SessionStoreConfig,
    ) -> Result<Self, StoreError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection_manager(conn, config))
    }

    /// Create a new Redis store from a connection string
    pub async fn from_url(url: &str, config: &SessionStoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {}", e)))?;
        Self::new(client, config).await
    }

    /// Create a new Redis store from an existing connection manager
    pub fn from_connection_manager(conn: ConnectionManager, config: &SessionStoreConfig) -> Self {
        Self {
            conn: Arc::new(conn),
            namespace: config.namespace(),
            reap_grace: Duration::hours(1),
            find_and_update: script(FIND_AND_UPDATE),
            delete_one: script(DELETE_ONE),
            upsert_one: script(UPSERT_ONE),
        }
    }

    /// Build with a custom reap grace (how long Redis keeps a document after
    /// it expired logically)
    pub fn with_reap_grace(mut self, grace: Duration) -> Self {
        self.reap_grace = grace;
        self
    }

    /// Make a storage key from a session key
    fn make_key(&self, key: &SessionKey) -> String {
        format!("{}:{}:{}", self.namespace, key.scope, key.id)
    }

    fn expire_at_ms(&self, record: &SessionRecord) -> i64 {
        (record.expires_at + self.reap_grace).timestamp_millis()
    }

    /// Block until the write concern is satisfied.
    ///
    /// `WAIT` and `WAITAOF` only cover writes sent on the same connection, so
    /// they run on the shared multiplexed connection and hold up every other
    /// command queued on it for up to `write_concern.timeout`.
    async fn acknowledge(&self, write_concern: &WriteConcern) -> Result<(), StoreError> {
        if !write_concern.needs_wait() {
            return Ok(());
        }
        let mut conn = (*self.conn).clone();
        let timeout_ms = write_concern.timeout.as_millis() as u64;

        let replicas = replicas_to_wait(write_concern);
        if replicas > 0 {
            let acked: u32 = redis::cmd("WAIT")
                .arg(replicas)
                .arg(timeout_ms)
                .query_async(&mut conn)
                .await?;
            if acked < replicas {
                return Err(StoreError::Backend(format!(
                    "write acknowledged by {} of {} members",
                    acked + 1,
                    write_concern.acknowledgments()
                )));
            }
        }

        if write_concern.fsync {
            let (local, _replicas): (u32, u32) = redis::cmd("WAITAOF")
                .arg(1)
                .arg(0)
                .arg(timeout_ms)
                .query_async(&mut conn)
                .await?;
            if local < 1 {
                return Err(StoreError::Backend(
                    "write was not fsynced to the local append-only file".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Replica acknowledgments to wait for; the primary's own is implied
fn replicas_to_wait(write_concern: &WriteConcern) -> u32 {
    write_concern.acknowledgments().saturating_sub(1)
}

fn script(body: &str) -> Script {
    Script::new(&format!("{}\n{}", LUA_PRELUDE, body))
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            namespace: self.namespace.clone(),
            reap_grace: self.reap_grace,
            find_and_update: self.find_and_update.clone(),
            delete_one: self.delete_one.clone(),
            upsert_one: self.upsert_one.clone(),
        }
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn find_one(&self, filter: &Filter) -> Result<Option<SessionRecord>, StoreError> {
        let key = self.make_key(&filter.key);
        let mut conn = (*self.conn).clone();

        let data: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;

        match data {
            Some(json) => {
                let record: SessionRecord = serde_json::from_str(&json)?;
                Ok(Some(record).filter(|record| filter.matches(record)))
            }
            None => Ok(None),
        }
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
        write_concern: &WriteConcern,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let key = self.make_key(&filter.key);
        let mut conn = (*self.conn).clone();

        let before: Option<String> = self
            .find_and_update
            .key(&key)
            .arg(serde_json::to_string(filter)?)
            .arg(serde_json::to_string(update)?)
            .arg(self.reap_grace.num_milliseconds())
            .invoke_async(&mut conn)
            .await?;

        match before {
            Some(json) => {
                self.acknowledge(write_concern).await?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_one(
        &self,
        record: &SessionRecord,
        write_concern: &WriteConcern,
    ) -> Result<(), StoreError> {
        let key = self.make_key(&record.key());
        let mut conn = (*self.conn).clone();

        let json = serde_json::to_string(record)?;
        let inserted: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("NX")
            .arg("PXAT")
            .arg(self.expire_at_ms(record))
            .query_async(&mut conn)
            .await?;

        if inserted.is_none() {
            return Err(StoreError::DuplicateKey(record.key().to_string()));
        }
        self.acknowledge(write_concern).await
    }

    async fn upsert_one(
        &self,
        filter: &Filter,
        record: &SessionRecord,
        write_concern: &WriteConcern,
    ) -> Result<(), StoreError> {
        if record.key() != filter.key {
            return Err(StoreError::Backend(format!(
                "upsert of {} under filter key {}",
                record.key(),
                filter.key
            )));
        }
        let key = self.make_key(&filter.key);
        let mut conn = (*self.conn).clone();

        let written: i64 = self
            .upsert_one
            .key(&key)
            .arg(serde_json::to_string(filter)?)
            .arg(serde_json::to_string(record)?)
            .arg(self.expire_at_ms(record))
            .invoke_async(&mut conn)
            .await?;

        if written == 0 {
            return Err(StoreError::DuplicateKey(filter.key.to_string()));
        }
        self.acknowledge(write_concern).await
    }

    async fn delete_one(
        &self,
        filter: &Filter,
        write_concern: &WriteConcern,
    ) -> Result<u64, StoreError> {
        let key = self.make_key(&filter.key);
        let mut conn = (*self.conn).clone();

        let deleted: u64 = self
            .delete_one
            .key(&key)
            .arg(serde_json::to_string(filter)?)
            .invoke_async(&mut conn)
            .await?;

        if deleted > 0 {
            self.acknowledge(write_concern).await?;
        }
        Ok(deleted)
    }

    async fn count(&self, scope: &str) -> Result<usize, StoreError> {
        let mut conn = (*self.conn).clone();

        let pattern = format!("{}:{}:*", self.namespace, scope);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;

        Ok(keys.len())
    }

    async fn clear(&self, scope: &str) -> Result<(), StoreError> {
        let mut conn = (*self.conn).clone();

        let pattern = format!("{}:{}:*", self.namespace, scope);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;

        if !keys.is_empty() {
            let _: () = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        }

        Ok(())
    }
}
