//! Redis-backed distributed cache with absolute and sliding expiration.
//!
//! Each entry is a hash holding the payload (`data`), the absolute deadline in
//! unix milliseconds (`absexp`) and the sliding window in milliseconds
//! (`sldexp`); `-1` marks an absent policy. Reads renew the key TTL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use keeper_application::{CacheEntryExpiration, DistributedCache};
use keeper_core::{AppError, AppResult};
use redis::{AsyncCommands, Script};

const SET_ENTRY_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], 'data', ARGV[1], 'absexp', ARGV[2], 'sldexp', ARGV[3])
if ARGV[4] ~= '-1' then
  redis.call('PEXPIRE', KEYS[1], ARGV[4])
else
  redis.call('PERSIST', KEYS[1])
end
return 1
"#;

const NO_EXPIRATION: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryTimings {
    absolute_deadline_ms: i64,
    sliding_ms: i64,
    ttl_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TtlRenewal {
    Keep,
    Renew(i64),
    Expired,
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn entry_timings(expiration: &CacheEntryExpiration, now_ms: i64) -> EntryTimings {
    EntryTimings {
        absolute_deadline_ms: expiration.absolute.map_or(NO_EXPIRATION, |absolute| {
            now_ms.saturating_add(duration_millis(absolute))
        }),
        sliding_ms: expiration.sliding.map_or(NO_EXPIRATION, duration_millis),
        ttl_ms: expiration
            .effective_ttl(None)
            .map_or(NO_EXPIRATION, duration_millis),
    }
}

fn renewed_ttl(now_ms: i64, absolute_deadline_ms: i64, sliding_ms: i64) -> TtlRenewal {
    if sliding_ms == NO_EXPIRATION {
        return TtlRenewal::Keep;
    }

    let ttl_ms = if absolute_deadline_ms == NO_EXPIRATION {
        sliding_ms
    } else {
        sliding_ms.min(absolute_deadline_ms.saturating_sub(now_ms))
    };

    if ttl_ms > 0 {
        TtlRenewal::Renew(ttl_ms)
    } else {
        TtlRenewal::Expired
    }
}

/// Redis implementation of the distributed cache port.
#[derive(Clone)]
pub struct RedisDistributedCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisDistributedCache {
    /// Creates a cache adapter with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{}:{key}", self.key_prefix)
        }
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }

    async fn renew(
        connection: &mut redis::aio::MultiplexedConnection,
        key: &str,
        absolute_deadline_ms: Option<i64>,
        sliding_ms: Option<i64>,
    ) -> AppResult<bool> {
        let renewal = renewed_ttl(
            Utc::now().timestamp_millis(),
            absolute_deadline_ms.unwrap_or(NO_EXPIRATION),
            sliding_ms.unwrap_or(NO_EXPIRATION),
        );

        match renewal {
            TtlRenewal::Keep => Ok(true),
            TtlRenewal::Renew(ttl_ms) => {
                connection
                    .pexpire::<_, ()>(key, ttl_ms)
                    .await
                    .map_err(|error| {
                        AppError::Internal(format!(
                            "failed to renew cache entry ttl: {error}"
                        ))
                    })?;
                Ok(true)
            }
            TtlRenewal::Expired => {
                connection.del::<_, ()>(key).await.map_err(|error| {
                    AppError::Internal(format!("failed to evict expired cache entry: {error}"))
                })?;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl DistributedCache for RedisDistributedCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let key = self.key_for(key);
        let mut connection = self.connection().await?;

        let (data, absolute_deadline_ms, sliding_ms): (Option<String>, Option<i64>, Option<i64>) =
            redis::cmd("HMGET")
                .arg(key.as_str())
                .arg("data")
                .arg("absexp")
                .arg("sldexp")
                .query_async(&mut connection)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to read cache entry: {error}"))
                })?;

        let Some(data) = data else {
            return Ok(None);
        };

        let live = Self::renew(&mut connection, key.as_str(), absolute_deadline_ms, sliding_ms)
            .await?;
        Ok(live.then_some(data))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiration: &CacheEntryExpiration,
    ) -> AppResult<()> {
        let timings = entry_timings(expiration, Utc::now().timestamp_millis());
        let mut connection = self.connection().await?;

        Script::new(SET_ENTRY_SCRIPT)
            .key(self.key_for(key))
            .arg(value)
            .arg(timings.absolute_deadline_ms)
            .arg(timings.sliding_ms)
            .arg(timings.ttl_ms)
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| AppError::Internal(format!("failed to write cache entry: {error}")))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        let mut connection = self.connection().await?;
        connection
            .del::<_, ()>(self.key_for(key))
            .await
            .map_err(|error| AppError::Internal(format!("failed to remove cache entry: {error}")))
    }

    async fn refresh(&self, key: &str) -> AppResult<()> {
        let key = self.key_for(key);
        let mut connection = self.connection().await?;

        let (absolute_deadline_ms, sliding_ms): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
            .arg(key.as_str())
            .arg("absexp")
            .arg("sldexp")
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to read cache entry timings: {error}"))
            })?;

        if absolute_deadline_ms.is_none() && sliding_ms.is_none() {
            return Ok(());
        }

        Self::renew(&mut connection, key.as_str(), absolute_deadline_ms, sliding_ms).await?;
        Ok(())
    }
}
