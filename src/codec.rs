//! Payload serialization boundary
//!
//! The store never interprets session contents. A [`SessionCodec`] turns the
//! caller's in-memory items into bytes and back; the coordinator wraps those
//! bytes in base64 so they fit the document's string field.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use crate::error::SessionResult;

/// Caller-supplied serialize/deserialize pair for session contents
pub trait SessionCodec: Send + Sync + 'static {
    /// In-memory session representation. `Default` is the empty session.
    type Items: Default + Send + Sync;

    fn encode(&self, items: &Self::Items) -> SessionResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> SessionResult<Self::Items>;
}

/// serde_json codec for any serde type
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> SessionCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    type Items = T;

    fn encode(&self, items: &T) -> SessionResult<Vec<u8>> {
        Ok(serde_json::to_vec(items)?)
    }

    fn decode(&self, bytes: &[u8]) -> SessionResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Codec built from two closures
///
/// ```rust
/// use session_lock_store::{FnCodec, SessionCodec};
///
/// let codec = FnCodec::new(
///     |text: &String| Ok(text.as_bytes().to_vec()),
///     |bytes: &[u8]| Ok(String::from_utf8_lossy(bytes).into_owned()),
/// );
/// assert_eq!(codec.decode(b"hi").unwrap(), "hi");
/// ```
pub struct FnCodec<T, E, D> {
    encode: E,
    decode: D,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E, D> FnCodec<T, E, D>
where
    E: Fn(&T) -> SessionResult<Vec<u8>>,
    D: Fn(&[u8]) -> SessionResult<T>,
{
    pub fn new(encode: E, decode: D) -> Self {
        Self {
            encode,
            decode,
            _marker: PhantomData,
        }
    }
}

impl<T, E, D> SessionCodec for FnCodec<T, E, D>
where
    T: Default + Send + Sync + 'static,
    E: Fn(&T) -> SessionResult<Vec<u8>> + Send + Sync + 'static,
    D: Fn(&[u8]) -> SessionResult<T> + Send + Sync + 'static,
{
    type Items = T;

    fn encode(&self, items: &T) -> SessionResult<Vec<u8>> {
        (self.encode)(items)
    }

    fn decode(&self, bytes: &[u8]) -> SessionResult<T> {
        (self.decode)(bytes)
    }
}

/// Items to stored payload text. Empty bytes become an empty payload.
pub(crate) fn encode_payload<C: SessionCodec>(
    codec: &C,
    items: &C::Items,
) -> SessionResult<String> {
    let bytes = codec.encode(items)?;
    Ok(STANDARD.encode(bytes))
}

/// Stored payload text to items. An empty payload is an empty session.
pub(crate) fn decode_payload<C: SessionCodec>(codec: &C, payload: &str) -> SessionResult<C::Items> {
    if payload.is_empty() {
        return Ok(C::Items::default());
    }
    let bytes = STANDARD.decode(payload)?;
    if bytes.is_empty() {
        return Ok(C::Items::default());
    }
    codec.decode(&bytes)
}
