use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use keeper_core::{AppError, AppResult};
use keeper_domain::{Entity, KeyValue, KeyValues};

use crate::cancellation::cancellation_pair;
use crate::persistence_ports::EntityReader;

use super::{CacheEntryExpiration, DistributedCache, EntityCache, EntityCacheOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: i64,
    total_cents: i64,
}

impl Entity for Order {
    const ENTITY_TYPE: &'static str = "Order";

    fn key_values(&self) -> KeyValues {
        KeyValues::single(self.id)
    }
}

#[derive(Default)]
struct FakeDistributedCache {
    entries: Mutex<HashMap<String, String>>,
    operations: AtomicUsize,
}

impl FakeDistributedCache {
    async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl DistributedCache for FakeDistributedCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        _expiration: &CacheEntryExpiration,
    ) -> AppResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn refresh(&self, _key: &str) -> AppResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeEntityReader {
    records: Mutex<HashMap<KeyValues, Value>>,
    queries: AtomicUsize,
    unreachable: AtomicBool,
    delay: Option<Duration>,
}

impl FakeEntityReader {
    async fn insert(&self, id: i64, total_cents: i64) {
        self.records.lock().await.insert(
            KeyValues::single(id),
            json!({ "id": id, "total_cents": total_cents }),
        );
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityReader for FakeEntityReader {
    async fn find_no_tracking(
        &self,
        _entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Internal("backing store unreachable".to_owned()));
        }

        Ok(self.records.lock().await.get(key_values).cloned())
    }
}

fn cache_with(
    options: EntityCacheOptions,
    reader: Arc<FakeEntityReader>,
) -> (EntityCache, Arc<FakeDistributedCache>) {
    let distributed = Arc::new(FakeDistributedCache::default());
    let cache = EntityCache::with_distributed_cache(options, distributed.clone(), reader);
    (cache, distributed)
}

fn app_options() -> EntityCacheOptions {
    EntityCacheOptions::new("App").unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn read_through_serves_second_call_from_cache() {
    let reader = Arc::new(FakeEntityReader::default());
    reader.insert(42, 1999).await;
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    let first = cache.get::<Order>(&KeyValues::single(42)).await;
    assert!(first.is_ok());
    assert_eq!(
        first.unwrap_or_default(),
        Some(Order {
            id: 42,
            total_cents: 1999
        })
    );
    assert_eq!(reader.queries(), 1);

    reader.unreachable.store(true, Ordering::SeqCst);
    let second = cache.get::<Order>(&KeyValues::single(42)).await;
    assert!(second.is_ok());
    assert_eq!(second.unwrap_or_default().map(|order| order.id), Some(42));
    assert_eq!(reader.queries(), 1);

    assert_eq!(
        distributed.keys().await,
        vec![
            "App:Order:pk:{42}".to_owned(),
            "App:Order:pk:{42}:value".to_owned()
        ]
    );
}

#[tokio::test]
async fn concurrent_misses_trigger_one_backing_query() {
    let reader = Arc::new(FakeEntityReader {
        delay: Some(Duration::from_millis(50)),
        ..FakeEntityReader::default()
    });
    reader.insert(7, 100).await;
    let (cache, _) = cache_with(app_options(), reader.clone());
    let cache = Arc::new(cache);

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let cache = cache.clone();
        tasks.spawn(async move { cache.get::<Order>(&KeyValues::single(7)).await });
    }

    let mut found = 0;
    while let Some(joined) = tasks.join_next().await {
        assert!(joined.is_ok());
        let result = joined.unwrap_or_else(|_| unreachable!());
        if matches!(result, Ok(Some(_))) {
            found += 1;
        }
    }

    assert_eq!(found, 16);
    assert_eq!(reader.queries(), 1);
}

#[tokio::test]
async fn invalidation_forces_a_fresh_backing_query() {
    let reader = Arc::new(FakeEntityReader::default());
    reader.insert(3, 10).await;
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    assert!(cache.get::<Order>(&KeyValues::single(3)).await.is_ok());
    reader.insert(3, 20).await;

    assert!(cache.invalidate::<Order>(&KeyValues::single(3)).await.is_ok());
    assert!(distributed.keys().await.is_empty());
    assert!(cache.invalidate::<Order>(&KeyValues::single(3)).await.is_ok());

    let refreshed = cache.get::<Order>(&KeyValues::single(3)).await;
    assert_eq!(
        refreshed.unwrap_or_default().map(|order| order.total_cents),
        Some(20)
    );
    assert_eq!(reader.queries(), 2);
}

#[tokio::test]
async fn absent_key_component_short_circuits_without_store_access() {
    let reader = Arc::new(FakeEntityReader::default());
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    let found = cache
        .get_optional::<Order>(&[Some(KeyValue::Int(1)), None])
        .await;
    assert!(matches!(found, Ok(None)));
    assert!(cache.invalidate_optional::<Order>(&[None]).await.is_ok());
    assert!(matches!(cache.get_document_optional("Order", &[]).await, Ok(None)));

    assert_eq!(reader.queries(), 0);
    assert_eq!(distributed.operations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backing_store_misses_are_not_cached() {
    let reader = Arc::new(FakeEntityReader::default());
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    for _ in 0..3 {
        let missing = cache.get::<Order>(&KeyValues::single(404)).await;
        assert!(matches!(missing, Ok(None)));
    }

    assert_eq!(reader.queries(), 3);
    assert!(distributed.keys().await.is_empty());
}

#[tokio::test]
async fn backing_store_failure_propagates_and_leaves_no_entry() {
    let reader = Arc::new(FakeEntityReader::default());
    reader.insert(5, 50).await;
    reader.unreachable.store(true, Ordering::SeqCst);
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    let result = cache.get::<Order>(&KeyValues::single(5)).await;
    assert!(matches!(result, Err(AppError::Internal(_))));
    assert!(distributed.keys().await.is_empty());

    reader.unreachable.store(false, Ordering::SeqCst);
    let recovered = cache.get::<Order>(&KeyValues::single(5)).await;
    assert!(matches!(recovered, Ok(Some(_))));
}

#[tokio::test]
async fn miss_waiting_past_lock_timeout_fails_with_timeout() {
    let reader = Arc::new(FakeEntityReader {
        delay: Some(Duration::from_millis(300)),
        ..FakeEntityReader::default()
    });
    reader.insert(1, 1).await;
    reader.insert(2, 2).await;
    let options = app_options().with_lock_timeout(Some(Duration::from_millis(20)));
    let (cache, _) = cache_with(options, reader.clone());
    let cache = Arc::new(cache);

    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get::<Order>(&KeyValues::single(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let blocked = cache.get::<Order>(&KeyValues::single(2)).await;
    assert!(matches!(blocked, Err(AppError::Timeout(_))));

    let slow = slow.await;
    assert!(slow.is_ok());
    assert!(matches!(slow.unwrap_or_else(|_| unreachable!()), Ok(Some(_))));
}

#[tokio::test]
async fn cancelled_read_releases_the_lock() {
    let reader = Arc::new(FakeEntityReader {
        delay: Some(Duration::from_millis(200)),
        ..FakeEntityReader::default()
    });
    reader.insert(8, 80).await;
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    let (trigger, signal) = cancellation_pair();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let cancelled = cache
        .get_with_cancellation::<Order>(&KeyValues::single(8), &signal)
        .await;
    assert!(matches!(cancelled, Err(AppError::Cancelled(_))));
    assert!(canceller.await.is_ok());
    assert!(distributed.keys().await.is_empty());

    let invalidated = tokio::time::timeout(
        Duration::from_secs(1),
        cache.invalidate_with_cancellation::<Order>(
            &KeyValues::single(8),
            &crate::cancellation::CancellationSignal::never(),
        ),
    )
    .await;
    assert!(matches!(invalidated, Ok(Ok(()))));
}

#[tokio::test]
async fn composite_keys_keep_component_order() {
    let reader = Arc::new(FakeEntityReader::default());
    let (cache, _) = cache_with(app_options(), reader);
    let key_values = KeyValues::new(vec![KeyValue::Int(2), KeyValue::from("eu")]);
    assert!(key_values.is_ok());
    let key_values = key_values.unwrap_or_else(|_| unreachable!());

    assert_eq!(
        cache.key_index_key("OrderLine", &key_values).unwrap_or_default(),
        "App:OrderLine:pk:{2,eu}"
    );
    assert!(matches!(
        cache.key_index_key(" ", &key_values),
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn dangling_key_index_entry_is_treated_as_a_miss() {
    let reader = Arc::new(FakeEntityReader::default());
    reader.insert(9, 90).await;
    let (cache, distributed) = cache_with(app_options(), reader.clone());

    assert!(cache.get::<Order>(&KeyValues::single(9)).await.is_ok());
    assert!(distributed.remove("App:Order:pk:{9}:value").await.is_ok());

    let reread = cache.get::<Order>(&KeyValues::single(9)).await;
    assert!(matches!(reread, Ok(Some(_))));
    assert_eq!(reader.queries(), 2);
    assert!(cache.refresh::<Order>(&KeyValues::single(9)).await.is_ok());
}
