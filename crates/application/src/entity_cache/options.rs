use std::time::Duration;

use keeper_core::{AppError, AppResult};

const DEFAULT_ABSOLUTE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_SLIDING_EXPIRATION: Duration = Duration::from_secs(6 * 60 * 60);

/// Expiration policy applied to both cache levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntryExpiration {
    /// Lifetime measured from the write, `None` for unbounded.
    pub absolute: Option<Duration>,
    /// Idle lifetime renewed on every read, `None` to disable.
    pub sliding: Option<Duration>,
}

impl CacheEntryExpiration {
    /// Entries that never expire.
    #[must_use]
    pub fn never() -> Self {
        Self {
            absolute: None,
            sliding: None,
        }
    }

    /// Time-to-live a fresh or just-read entry gets, capped by the remaining absolute lifetime.
    #[must_use]
    pub fn effective_ttl(&self, remaining_absolute: Option<Duration>) -> Option<Duration> {
        match (self.sliding, remaining_absolute.or(self.absolute)) {
            (Some(sliding), Some(absolute)) => Some(sliding.min(absolute)),
            (Some(sliding), None) => Some(sliding),
            (None, absolute) => absolute,
        }
    }
}

impl Default for CacheEntryExpiration {
    fn default() -> Self {
        Self {
            absolute: Some(DEFAULT_ABSOLUTE_EXPIRATION),
            sliding: Some(DEFAULT_SLIDING_EXPIRATION),
        }
    }
}

/// Entity cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCacheOptions {
    key_prefix: String,
    entry_expiration: CacheEntryExpiration,
    lock_timeout: Option<Duration>,
}

impl EntityCacheOptions {
    /// Creates options with the default expiration and no lock timeout.
    pub fn new(key_prefix: impl Into<String>) -> AppResult<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(AppError::Configuration(
                "entity cache key prefix must not be empty".to_owned(),
            ));
        }

        Ok(Self {
            key_prefix,
            entry_expiration: CacheEntryExpiration::default(),
            lock_timeout: None,
        })
    }

    /// Overrides the entry expiration policy.
    #[must_use]
    pub fn with_entry_expiration(mut self, entry_expiration: CacheEntryExpiration) -> Self {
        self.entry_expiration = entry_expiration;
        self
    }

    /// Bounds how long a miss waits for the cache lock. `None` waits forever.
    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Prefix of every cache key.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_str()
    }

    /// Expiration applied to both cache levels.
    #[must_use]
    pub fn entry_expiration(&self) -> &CacheEntryExpiration {
        &self.entry_expiration
    }

    /// Lock acquisition timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }
}
