//! Stored session document

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lookup key of a session document: the caller's id inside a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub id: String,
    pub scope: String,
}

impl SessionKey {
    pub fn new<I: Into<String>, S: Into<String>>(id: I, scope: S) -> Self {
        Self {
            id: id.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

/// Identifies one lock acquisition. Only ever increases for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(pub i64);

impl LockToken {
    pub fn next(self) -> Self {
        LockToken(self.0 + 1)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Work the next reader has to do before using the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    #[default]
    None,
    /// Placeholder record: materialize a fresh session instead of decoding
    Initialize,
}

/// One session document.
///
/// Timestamps are kept with millisecond precision, which is what the Redis
/// backend stores. `payload` is the base64 text of the codec output; an
/// empty string means nothing has been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub scope: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub lock_held: bool,
    pub lock_token: LockToken,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub lock_acquired_at: DateTime<Utc>,
    pub timeout_minutes: u32,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub pending_action: PendingAction,
}

impl SessionRecord {
    /// Reserved record awaiting its first write
    pub fn placeholder(key: &SessionKey, now: DateTime<Utc>, timeout_minutes: u32) -> Self {
        Self {
            id: key.id.clone(),
            scope: key.scope.clone(),
            created_at: now,
            expires_at: now + minutes(timeout_minutes),
            lock_held: false,
            lock_token: LockToken(0),
            lock_acquired_at: now,
            timeout_minutes,
            payload: String::new(),
            pending_action: PendingAction::Initialize,
        }
    }

    /// Full, unlocked record carrying its first payload
    pub fn materialized(
        key: &SessionKey,
        now: DateTime<Utc>,
        timeout_minutes: u32,
        payload: String,
    ) -> Self {
        Self {
            payload,
            pending_action: PendingAction::None,
            ..Self::placeholder(key, now, timeout_minutes)
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.id.clone(), self.scope.clone())
    }

    /// Alive iff `expires_at > now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn lock_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.lock_acquired_at
    }
}

pub(crate) fn minutes(value: u32) -> Duration {
    Duration::minutes(i64::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_fields() {
        let now = Utc::now();
        let record = SessionRecord::placeholder(&SessionKey::new("S1", "/app"), now, 20);
        assert_eq!(record.pending_action, PendingAction::Initialize);
        assert_eq!(record.lock_token, LockToken(0));
        assert!(!record.lock_held);
        assert!(record.payload.is_empty());
        assert_eq!(record.expires_at - record.created_at, Duration::minutes(20));
        assert!(!record.is_expired(now));
        assert!(record.is_expired(record.expires_at));
    }

    #[test]
    fn test_document_json_shape() {
        let now = DateTime::from_timestamp_millis(1_760_000_000_123).unwrap();
        let record = SessionRecord::materialized(
            &SessionKey::new("abc", "/app"),
            now,
            5,
            "cGF5bG9hZA==".to_string(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["created_at"], 1_760_000_000_123i64);
        assert_eq!(json["lock_token"], 0);
        assert_eq!(json["pending_action"], "none");

        let back: SessionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
