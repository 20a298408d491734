use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keeper_application::{CacheEntryExpiration, DistributedCache};
use keeper_core::AppResult;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    absolute_deadline: Option<Instant>,
    sliding: Option<Duration>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, expiration: &CacheEntryExpiration, now: Instant) -> Self {
        let absolute_deadline = expiration
            .absolute
            .and_then(|absolute| now.checked_add(absolute));
        let expires_at = expiration
            .effective_ttl(None)
            .and_then(|ttl| now.checked_add(ttl));

        Self {
            value,
            absolute_deadline,
            sliding: expiration.sliding,
            expires_at,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    fn touch(&mut self, now: Instant) {
        let Some(sliding) = self.sliding else {
            return;
        };

        let renewed = now.checked_add(sliding);
        self.expires_at = match (renewed, self.absolute_deadline) {
            (Some(renewed), Some(deadline)) => Some(renewed.min(deadline)),
            (renewed, None) => renewed,
            (None, deadline) => deadline,
        };
    }
}

/// In-memory distributed cache adapter with absolute and sliding expiration.
#[derive(Debug, Default)]
pub struct InMemoryDistributedCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryDistributedCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn touch_live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.touch(now);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.touch_live(key).await)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiration: &CacheEntryExpiration,
    ) -> AppResult<()> {
        let entry = CacheEntry::new(value.to_owned(), expiration, Instant::now());
        self.entries.write().await.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn refresh(&self, key: &str) -> AppResult<()> {
        self.touch_live(key).await;
        Ok(())
    }
}
