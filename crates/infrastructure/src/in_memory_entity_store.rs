use std::collections::HashMap;

use async_trait::async_trait;
use keeper_application::{EntityStore, PendingWrite, WriteOperation};
use keeper_core::{AppError, AppResult};
use keeper_domain::KeyValues;
use serde_json::Value;
use tokio::sync::RwLock;

type RecordKey = (String, KeyValues);

/// In-memory entity store with all-or-nothing write batches.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    records: RwLock<HashMap<RecordKey, Value>>,
}

impl InMemoryEntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of one entity type.
    pub async fn count(&self, entity_type: &str) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(stored_type, _)| stored_type == entity_type)
            .count()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn apply_changes(&self, writes: Vec<PendingWrite>) -> AppResult<u64> {
        let mut records = self.records.write().await;
        let mut staged = records.clone();

        for write in &writes {
            let key = (write.entity_type.to_owned(), write.key_values.clone());
            match &write.operation {
                WriteOperation::Insert(document) => {
                    if staged.contains_key(&key) {
                        return Err(AppError::Conflict(format!(
                            "entity '{}' with key {} already exists",
                            key.0, key.1
                        )));
                    }
                    staged.insert(key, document.clone());
                }
                WriteOperation::Update(document) => {
                    let Some(stored) = staged.get_mut(&key) else {
                        return Err(AppError::NotFound(format!(
                            "entity '{}' with key {} does not exist",
                            key.0, key.1
                        )));
                    };
                    *stored = document.clone();
                }
                WriteOperation::Delete => {
                    staged.remove(&key);
                }
            }
        }

        *records = staged;
        Ok(writes.len() as u64)
    }

    async fn find_by_key(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(entity_type.to_owned(), key_values.clone()))
            .cloned())
    }
}
