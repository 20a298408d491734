use std::sync::Arc;

use serde_json::Value;

use keeper_core::{AppError, AppResult};

use super::{CacheEntryExpiration, DistributedCache};

/// First cache level: composite entity key to value-store key.
#[derive(Clone)]
pub struct CacheKeyIndex {
    cache: Arc<dyn DistributedCache>,
    expiration: CacheEntryExpiration,
}

impl CacheKeyIndex {
    /// Creates a key index over one distributed cache.
    #[must_use]
    pub fn new(cache: Arc<dyn DistributedCache>, expiration: CacheEntryExpiration) -> Self {
        Self { cache, expiration }
    }

    /// Resolves the value-store key. Empty pointers count as misses.
    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self
            .cache
            .get(key)
            .await?
            .filter(|value_key| !value_key.is_empty()))
    }

    /// Points `key` at `value_key`.
    pub async fn set(&self, key: &str, value_key: &str) -> AppResult<()> {
        self.cache.set(key, value_key, &self.expiration).await
    }

    /// Removes one pointer.
    pub async fn remove(&self, key: &str) -> AppResult<()> {
        self.cache.remove(key).await
    }

    /// Renews the pointer's sliding expiration.
    pub async fn refresh(&self, key: &str) -> AppResult<()> {
        self.cache.refresh(key).await
    }
}

/// Second cache level: value-store key to serialized entity document.
#[derive(Clone)]
pub struct CacheValueStore {
    cache: Arc<dyn DistributedCache>,
    expiration: CacheEntryExpiration,
}

impl CacheValueStore {
    /// Creates a value store over one distributed cache.
    #[must_use]
    pub fn new(cache: Arc<dyn DistributedCache>, expiration: CacheEntryExpiration) -> Self {
        Self { cache, expiration }
    }

    /// Reads and decodes one document.
    pub async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.cache
            .get(key)
            .await?
            .map(|payload| {
                serde_json::from_str(payload.as_str()).map_err(|error| {
                    AppError::Internal(format!(
                        "failed to decode cached entity under '{key}': {error}"
                    ))
                })
            })
            .transpose()
    }

    /// Encodes and writes one document.
    pub async fn set(&self, key: &str, document: &Value) -> AppResult<()> {
        let payload = serde_json::to_string(document).map_err(|error| {
            AppError::Internal(format!(
                "failed to encode cached entity under '{key}': {error}"
            ))
        })?;

        self.cache.set(key, payload.as_str(), &self.expiration).await
    }

    /// Removes one document.
    pub async fn remove(&self, key: &str) -> AppResult<()> {
        self.cache.remove(key).await
    }

    /// Renews the document's sliding expiration.
    pub async fn refresh(&self, key: &str) -> AppResult<()> {
        self.cache.refresh(key).await
    }
}
