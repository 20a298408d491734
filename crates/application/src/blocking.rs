//! Blocking entry points for callers outside an async runtime.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

use keeper_core::{AppError, AppResult};
use keeper_domain::{ActorKey, Entity, KeyValue, KeyValues};

use crate::entity_cache::EntityCache;
use crate::unit_of_work::UnitOfWork;

/// Drives cache and commit operations to completion on an owned runtime.
///
/// Calls made from inside another tokio runtime fail with
/// [`AppError::Internal`] instead of blocking a worker thread.
pub struct BlockingExecutor {
    runtime: Runtime,
}

impl BlockingExecutor {
    /// Builds a current-thread runtime with timers and I/O enabled.
    pub fn new() -> AppResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build blocking runtime: {error}"))
            })?;

        Ok(Self { runtime })
    }

    /// Runs one future to completion.
    pub fn block_on<F: Future>(&self, future: F) -> AppResult<F::Output> {
        if Handle::try_current().is_ok() {
            return Err(AppError::Internal(
                "blocking entity operation called from inside an async runtime".to_owned(),
            ));
        }

        Ok(self.runtime.block_on(future))
    }

    /// Blocking [`EntityCache::get`].
    pub fn get<T: Entity>(&self, cache: &EntityCache, key_values: &KeyValues) -> AppResult<Option<T>> {
        self.block_on(cache.get::<T>(key_values))?
    }

    /// Blocking [`EntityCache::get_optional`].
    pub fn get_optional<T: Entity>(
        &self,
        cache: &EntityCache,
        key_values: &[Option<KeyValue>],
    ) -> AppResult<Option<T>> {
        self.block_on(cache.get_optional::<T>(key_values))?
    }

    /// Blocking [`EntityCache::invalidate`].
    pub fn invalidate<T: Entity>(&self, cache: &EntityCache, key_values: &KeyValues) -> AppResult<()> {
        self.block_on(cache.invalidate::<T>(key_values))?
    }

    /// Blocking [`EntityCache::invalidate_optional`].
    pub fn invalidate_optional<T: Entity>(
        &self,
        cache: &EntityCache,
        key_values: &[Option<KeyValue>],
    ) -> AppResult<()> {
        self.block_on(cache.invalidate_optional::<T>(key_values))?
    }

    /// Blocking [`UnitOfWork::save_changes`].
    pub fn save_changes<A: ActorKey>(&self, unit_of_work: &mut UnitOfWork<A>) -> AppResult<u64> {
        self.block_on(unit_of_work.save_changes())?
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use keeper_core::AppResult;
    use keeper_domain::{
        CreationRecord, CreationRecordable, Entity, EntityCapabilities, KeyValue, KeyValues,
    };

    use crate::entity_cache::{
        CacheEntryExpiration, DistributedCache, EntityCache, EntityCacheOptions,
    };
    use crate::persistence_ports::{EntityStore, PendingWrite, WriteOperation};
    use crate::unit_of_work::UnitOfWorkFactory;

    use super::BlockingExecutor;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: i64,
        #[serde(flatten)]
        creation: CreationRecord<()>,
    }

    impl Entity for Widget {
        const ENTITY_TYPE: &'static str = "widgets";

        fn key_values(&self) -> KeyValues {
            KeyValues::single(self.id)
        }
    }

    impl EntityCapabilities<()> for Widget {
        fn creation(&mut self) -> Option<&mut dyn CreationRecordable<()>> {
            Some(&mut self.creation)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        records: Mutex<HashMap<KeyValues, Value>>,
    }

    #[async_trait]
    impl EntityStore for FakeStore {
        async fn apply_changes(&self, writes: Vec<PendingWrite>) -> AppResult<u64> {
            let mut records = self.records.lock().map_err(|_| {
                keeper_core::AppError::Internal("fake store poisoned".to_owned())
            })?;
            for write in &writes {
                if let WriteOperation::Insert(document) | WriteOperation::Update(document) =
                    &write.operation
                {
                    records.insert(write.key_values.clone(), document.clone());
                }
            }
            Ok(writes.len() as u64)
        }

        async fn find_by_key(
            &self,
            _entity_type: &str,
            key_values: &KeyValues,
        ) -> AppResult<Option<Value>> {
            Ok(self
                .records
                .lock()
                .ok()
                .and_then(|records| records.get(key_values).cloned()))
        }
    }

    #[derive(Default)]
    struct FakeCache {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl DistributedCache for FakeCache {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            Ok(self
                .entries
                .lock()
                .ok()
                .and_then(|entries| entries.get(key).cloned()))
        }

        async fn set(
            &self,
            key: &str,
            value: &str,
            _expiration: &CacheEntryExpiration,
        ) -> AppResult<()> {
            if let Ok(mut entries) = self.entries.lock() {
                entries.insert(key.to_owned(), value.to_owned());
            }
            Ok(())
        }

        async fn remove(&self, key: &str) -> AppResult<()> {
            if let Ok(mut entries) = self.entries.lock() {
                entries.remove(key);
            }
            Ok(())
        }

        async fn refresh(&self, _key: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn blocking_forms_commit_and_read_through() {
        let executor = BlockingExecutor::new();
        assert!(executor.is_ok());
        let executor = executor.unwrap_or_else(|_| unreachable!());

        let factory = UnitOfWorkFactory::<()>::builder(Arc::new(FakeStore::default())).build();
        assert!(factory.is_ok());
        let factory = Arc::new(factory.unwrap_or_else(|_| unreachable!()));

        let mut unit_of_work = factory.create();
        assert!(
            unit_of_work
                .add(Widget {
                    id: 1,
                    creation: CreationRecord::default(),
                })
                .is_ok()
        );
        assert_eq!(executor.save_changes(&mut unit_of_work).unwrap_or_default(), 1);

        let options = EntityCacheOptions::new("Blocking").unwrap_or_else(|_| unreachable!());
        let cache = EntityCache::with_distributed_cache(
            options,
            Arc::new(FakeCache::default()),
            factory,
        );

        let widget = executor.get::<Widget>(&cache, &KeyValues::single(1));
        assert!(widget.is_ok());
        let widget = widget.unwrap_or_default();
        assert!(widget.is_some_and(|widget| widget.creation.created_at.is_some()));

        let absent = executor.get_optional::<Widget>(&cache, &[None::<KeyValue>]);
        assert!(matches!(absent, Ok(None)));
        assert!(executor.invalidate::<Widget>(&cache, &KeyValues::single(1)).is_ok());
        assert!(executor.invalidate_optional::<Widget>(&cache, &[None]).is_ok());
    }

    #[test]
    fn blocking_forms_refuse_to_run_inside_a_runtime() {
        let executor = BlockingExecutor::new();
        assert!(executor.is_ok());
        let executor = executor.unwrap_or_else(|_| unreachable!());

        let factory = UnitOfWorkFactory::<()>::builder(Arc::new(FakeStore::default())).build();
        assert!(factory.is_ok());
        let factory = Arc::new(factory.unwrap_or_else(|_| unreachable!()));
        let options = EntityCacheOptions::new("Blocking").unwrap_or_else(|_| unreachable!());
        let cache = EntityCache::with_distributed_cache(
            options,
            Arc::new(FakeCache::default()),
            factory.clone(),
        );

        let outer = tokio::runtime::Builder::new_current_thread().build();
        assert!(outer.is_ok());
        let outer = outer.unwrap_or_else(|_| unreachable!());
        {
            let _entered = outer.enter();
            let read = executor.get::<Widget>(&cache, &KeyValues::single(1));
            assert!(matches!(read, Err(keeper_core::AppError::Internal(_))));

            let mut unit_of_work = factory.create();
            assert!(matches!(
                executor.save_changes(&mut unit_of_work),
                Err(keeper_core::AppError::Internal(_))
            ));
        }

        assert!(executor.block_on(async { 7 }).is_ok_and(|value| value == 7));
    }
}
