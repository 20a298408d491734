//! Read-through, single-flight entity cache.
//!
//! Entries live in two levels: the key index maps
//! `{prefix}:{entity_type}:pk:{v1,v2}` to a value-store key, and the value
//! store holds the serialized entity document. Hits never lock. Misses are
//! serialized by one lock per cache instance and double-checked under it, so
//! concurrent misses on the same key produce one backing-store read.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use keeper_core::{AppError, AppResult};
use keeper_domain::{Entity, KeyValue, KeyValues};

use crate::cancellation::CancellationSignal;
use crate::persistence_ports::EntityReader;

mod options;
mod ports;
mod stores;

#[cfg(test)]
mod tests;

pub use options::{CacheEntryExpiration, EntityCacheOptions};
pub use ports::DistributedCache;
pub use stores::{CacheKeyIndex, CacheValueStore};

/// Read-through cache in front of an [`EntityReader`].
pub struct EntityCache {
    options: EntityCacheOptions,
    key_index: CacheKeyIndex,
    value_store: CacheValueStore,
    reader: Arc<dyn EntityReader>,
    miss_lock: Mutex<()>,
}

impl EntityCache {
    /// Creates a cache over explicit key-index and value-store levels.
    #[must_use]
    pub fn new(
        options: EntityCacheOptions,
        key_index: CacheKeyIndex,
        value_store: CacheValueStore,
        reader: Arc<dyn EntityReader>,
    ) -> Self {
        Self {
            options,
            key_index,
            value_store,
            reader,
            miss_lock: Mutex::new(()),
        }
    }

    /// Creates a cache whose two levels share one distributed cache.
    #[must_use]
    pub fn with_distributed_cache(
        options: EntityCacheOptions,
        cache: Arc<dyn DistributedCache>,
        reader: Arc<dyn EntityReader>,
    ) -> Self {
        let expiration = *options.entry_expiration();
        Self::new(
            options,
            CacheKeyIndex::new(cache.clone(), expiration),
            CacheValueStore::new(cache, expiration),
            reader,
        )
    }

    /// Cache configuration.
    #[must_use]
    pub fn options(&self) -> &EntityCacheOptions {
        &self.options
    }

    /// Key-index key of one record.
    pub fn key_index_key(&self, entity_type: &str, key_values: &KeyValues) -> AppResult<String> {
        if entity_type.trim().is_empty() {
            return Err(AppError::Validation(
                "entity type must not be empty".to_owned(),
            ));
        }

        Ok(format!(
            "{}:{entity_type}:pk:{key_values}",
            self.options.key_prefix()
        ))
    }

    /// Reads one entity through the cache.
    pub async fn get<T: Entity>(&self, key_values: &KeyValues) -> AppResult<Option<T>> {
        self.get_document(T::ENTITY_TYPE, key_values)
            .await?
            .map(|document| decode_entity::<T>(document, key_values))
            .transpose()
    }

    /// Reads one entity by a nullable key tuple.
    ///
    /// Any absent component short-circuits to `None` without touching a store.
    pub async fn get_optional<T: Entity>(
        &self,
        key_values: &[Option<KeyValue>],
    ) -> AppResult<Option<T>> {
        match KeyValues::from_optional(key_values) {
            Some(key_values) => self.get::<T>(&key_values).await,
            None => Ok(None),
        }
    }

    /// Reads one raw entity document through the cache.
    pub async fn get_document(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>> {
        let key = self.key_index_key(entity_type, key_values)?;
        if let Some(document) = self.lookup(&key).await? {
            trace!(cache_key = %key, "entity cache hit");
            return Ok(Some(document));
        }

        let _guard = self.lock_misses().await?;
        if let Some(document) = self.lookup(&key).await? {
            trace!(cache_key = %key, "entity cache hit after lock");
            return Ok(Some(document));
        }

        let Some(document) = self.reader.find_no_tracking(entity_type, key_values).await? else {
            debug!(cache_key = %key, "entity not found in backing store");
            return Ok(None);
        };

        let value_key = value_key_for(&key);
        self.value_store.set(&value_key, &document).await?;
        self.key_index.set(&key, &value_key).await?;
        debug!(cache_key = %key, "entity cache populated");

        Ok(Some(document))
    }

    /// Reads one raw document by a nullable key tuple.
    pub async fn get_document_optional(
        &self,
        entity_type: &str,
        key_values: &[Option<KeyValue>],
    ) -> AppResult<Option<Value>> {
        match KeyValues::from_optional(key_values) {
            Some(key_values) => self.get_document(entity_type, &key_values).await,
            None => Ok(None),
        }
    }

    /// Drops both cache levels for one entity. Idempotent.
    pub async fn invalidate<T: Entity>(&self, key_values: &KeyValues) -> AppResult<()> {
        self.invalidate_document(T::ENTITY_TYPE, key_values).await
    }

    /// Drops one entity by a nullable key tuple; absent components are a no-op.
    pub async fn invalidate_optional<T: Entity>(
        &self,
        key_values: &[Option<KeyValue>],
    ) -> AppResult<()> {
        match KeyValues::from_optional(key_values) {
            Some(key_values) => self.invalidate::<T>(&key_values).await,
            None => Ok(()),
        }
    }

    /// Drops both cache levels for one raw entity type and key.
    pub async fn invalidate_document(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<()> {
        let key = self.key_index_key(entity_type, key_values)?;

        let _guard = self.lock_misses().await?;
        let value_key = self
            .key_index
            .get(&key)
            .await?
            .unwrap_or_else(|| value_key_for(&key));
        self.key_index.remove(&key).await?;
        self.value_store.remove(&value_key).await?;
        debug!(cache_key = %key, "entity cache entry invalidated");

        Ok(())
    }

    /// Renews the sliding expiration of both levels without reading the entity.
    pub async fn refresh<T: Entity>(&self, key_values: &KeyValues) -> AppResult<()> {
        let key = self.key_index_key(T::ENTITY_TYPE, key_values)?;
        self.key_index.refresh(&key).await?;
        self.value_store.refresh(&value_key_for(&key)).await
    }

    /// [`EntityCache::get`] that unwinds when `signal` fires.
    pub async fn get_with_cancellation<T: Entity>(
        &self,
        key_values: &KeyValues,
        signal: &CancellationSignal,
    ) -> AppResult<Option<T>> {
        signal
            .guard("entity cache read", self.get::<T>(key_values))
            .await
    }

    /// [`EntityCache::invalidate`] that unwinds when `signal` fires.
    pub async fn invalidate_with_cancellation<T: Entity>(
        &self,
        key_values: &KeyValues,
        signal: &CancellationSignal,
    ) -> AppResult<()> {
        signal
            .guard("entity cache invalidation", self.invalidate::<T>(key_values))
            .await
    }

    async fn lookup(&self, key: &str) -> AppResult<Option<Value>> {
        let Some(value_key) = self.key_index.get(key).await? else {
            return Ok(None);
        };

        self.value_store.get(&value_key).await
    }

    async fn lock_misses(&self) -> AppResult<MutexGuard<'_, ()>> {
        let Some(lock_timeout) = self.options.lock_timeout() else {
            return Ok(self.miss_lock.lock().await);
        };

        tokio::time::timeout(lock_timeout, self.miss_lock.lock())
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "entity cache lock not acquired within {} ms",
                    lock_timeout.as_millis()
                ))
            })
    }
}

fn value_key_for(key_index_key: &str) -> String {
    format!("{key_index_key}:value")
}

fn decode_entity<T: Entity>(document: Value, key_values: &KeyValues) -> AppResult<T> {
    serde_json::from_value(document).map_err(|error| {
        AppError::Internal(format!(
            "failed to decode cached entity '{}' with key {key_values}: {error}",
            T::ENTITY_TYPE
        ))
    })
}
