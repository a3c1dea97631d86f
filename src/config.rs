//! Session store configuration

use std::time::Duration;

use crate::error::SessionError;

/// Default database name, used as the first segment of every storage key
pub const DEFAULT_DATABASE_NAME: &str = "SessionState";

/// Default collection name
pub const DEFAULT_COLLECTION_NAME: &str = "Sessions";

/// Default session timeout in minutes
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 20;

/// Acknowledgment strength requested for every write.
///
/// This is passed through to the store untouched; the locking protocol does
/// not depend on it.
///
/// On `RedisStore` a concern that waits (replicas or fsync) blocks the
/// store's shared connection after each write, so every other session
/// operation in the process queues behind it for up to `timeout`. Give such
/// workloads their own store instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteConcern {
    /// Number of replicas, besides the primary, that must acknowledge a write
    pub replicas_to_write: u32,
    /// Whether to wait for the write to reach the append-only file
    pub fsync: bool,
    /// How long to wait for acknowledgments (zero = forever)
    pub timeout: Duration,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            replicas_to_write: 0,
            fsync: false,
            timeout: Duration::from_secs(5),
        }
    }
}

impl WriteConcern {
    /// Acknowledge on the primary only
    pub fn primary() -> Self {
        Self::default()
    }

    /// Acknowledge on the primary plus `replicas` replicas
    pub fn replicated(replicas: u32) -> Self {
        Self {
            replicas_to_write: replicas,
            ..Default::default()
        }
    }

    /// Set the fsync flag
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Set the acknowledgment timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total number of members that acknowledge a write, primary included
    pub fn acknowledgments(&self) -> u32 {
        self.replicas_to_write + 1
    }

    /// Whether the store has to wait after writing
    pub fn needs_wait(&self) -> bool {
        self.replicas_to_write > 0 || self.fsync
    }
}

/// Configuration for the session store
#[derive(Clone, Debug)]
pub struct SessionStoreConfig {
    /// Logical partition for session ids (typically the application name)
    pub scope: String,

    /// Database name (default: "SessionState")
    pub database_name: String,

    /// Collection name (default: "Sessions")
    pub collection_name: String,

    /// Timeout applied by release, touch and fresh sessions (default: 20)
    pub default_timeout_minutes: u32,

    /// Acknowledgment strength for writes
    pub write_concern: WriteConcern,

    /// Whether store failures are logged and replaced by a generic error
    /// (default: false)
    pub log_failures: bool,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            scope: "/".to_string(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            write_concern: WriteConcern::default(),
            log_failures: false,
        }
    }
}

impl SessionStoreConfig {
    /// Create a new configuration for the given scope
    pub fn new<S: Into<String>>(scope: S) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }

    /// Set the database name (default: "SessionState")
    pub fn with_database_name<S: Into<String>>(mut self, name: S) -> Self {
        self.database_name = name.into();
        self
    }

    /// Set the collection name (default: "Sessions")
    pub fn with_collection_name<S: Into<String>>(mut self, name: S) -> Self {
        self.collection_name = name.into();
        self
    }

    /// Set the default timeout in minutes (default: 20)
    pub fn with_default_timeout(mut self, minutes: u32) -> Self {
        self.default_timeout_minutes = minutes;
        self
    }

    /// Set the write concern
    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    /// Set whether failures are logged and masked (default: false)
    pub fn with_log_failures(mut self, log_failures: bool) -> Self {
        self.log_failures = log_failures;
        self
    }

    /// Default timeout as a chrono duration
    pub fn default_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.default_timeout_minutes))
    }

    /// Storage namespace: `database:collection`
    pub fn namespace(&self) -> String {
        format!("{}:{}", self.database_name, self.collection_name)
    }

    /// Check the configuration before handing it to a coordinator
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.scope.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "scope cannot be blank".to_string(),
            ));
        }
        if self.database_name.trim().is_empty() || self.collection_name.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "database and collection names cannot be blank".to_string(),
            ));
        }
        if self.default_timeout_minutes == 0 {
            return Err(SessionError::InvalidConfig(
                "default timeout must be at least one minute".to_string(),
            ));
        }
        Ok(())
    }
}
