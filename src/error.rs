//! Session error types

use thiserror::Error;

/// Errors raised by a [`DocumentStore`](crate::store::DocumentStore) backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert collided with an existing `(id, scope)` document
    #[error("document already exists: {0}")]
    DuplicateKey(String),
    /// Document could not be encoded or decoded
    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(String),
    /// Optional operation the backend does not provide
    #[error("{0} not implemented")]
    NotSupported(&'static str),
}

/// Errors that can occur during session operations
///
/// Lock contention, token mismatches and missing sessions are not errors;
/// they are reported through [`ItemLookup`](crate::ItemLookup) and
/// [`WriteOutcome`](crate::WriteOutcome).
#[derive(Debug, Error)]
pub enum SessionError {
    /// A placeholder was requested for an id that is already in use
    #[error("session {id} already exists")]
    DuplicateSession { id: String },
    /// Store failure, propagated as-is
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
    /// Store failure that was logged and masked
    #[error("An exception occurred. Please contact your administrator.")]
    Provider { action: &'static str },
    /// Payload could not be encoded or decoded by the codec
    #[error("session payload codec error: {0}")]
    Codec(String),
    /// Configuration rejected by validation
    #[error("invalid session store configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Wrap a codec failure message
    pub fn codec<M: Into<String>>(message: M) -> Self {
        SessionError::Codec(message.into())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Codec(err.to_string())
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(err: base64::DecodeError) -> Self {
        SessionError::Codec(format!("payload is not valid base64: {}", err))
    }
}

/// Result alias used throughout the crate
pub type SessionResult<T> = Result<T, SessionError>;
