//! Materialized session state handed to callers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Key/value session contents, the default item type for [`JsonCodec`](crate::JsonCodec)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionItems {
    #[serde(flatten)]
    data: HashMap<String, Value>,

    /// Whether the items changed since they were materialized
    #[serde(skip)]
    dirty: bool,
}

impl PartialEq for SessionItems {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value from session data
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in session data
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), v);
            self.dirty = true;
        }
    }

    /// Remove a value from session data
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Check if a key exists
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Clear all session data
    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            self.dirty = true;
        }
        self.data.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if the items have been modified.
    ///
    /// Request handlers read this to choose between
    /// [`set_and_release_item`](crate::SessionLockCoordinator::set_and_release_item)
    /// and a plain
    /// [`release_item`](crate::SessionLockCoordinator::release_item) when
    /// nothing changed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Session contents plus the timeout they will be written back with
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStateData<T> {
    pub items: T,
    pub timeout_minutes: u32,
}

impl<T: Default> SessionStateData<T> {
    /// Fresh, empty session state
    pub fn empty(timeout_minutes: u32) -> Self {
        Self {
            items: T::default(),
            timeout_minutes,
        }
    }
}

impl<T> SessionStateData<T> {
    pub fn new(items: T, timeout_minutes: u32) -> Self {
        Self {
            items,
            timeout_minutes,
        }
    }

    pub fn with_timeout(mut self, timeout_minutes: u32) -> Self {
        self.timeout_minutes = timeout_minutes;
        self
    }
}
