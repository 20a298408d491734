use async_trait::async_trait;

use keeper_core::AppResult;

use super::CacheEntryExpiration;

/// String-keyed distributed store behind both cache levels.
///
/// Reads renew the sliding expiration of the entry they hit.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Reads one entry.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Writes one entry with the given expiration, replacing any previous value.
    async fn set(&self, key: &str, value: &str, expiration: &CacheEntryExpiration)
    -> AppResult<()>;

    /// Removes one entry. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> AppResult<()>;

    /// Renews the sliding expiration of one entry without reading it.
    async fn refresh(&self, key: &str) -> AppResult<()>;
}
