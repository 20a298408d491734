use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use keeper_core::AppResult;
use keeper_domain::KeyValues;

/// One flushed change produced by a unit-of-work commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Entity type (storage table) the write targets.
    pub entity_type: &'static str,
    /// Primary key of the written record.
    pub key_values: KeyValues,
    /// Operation to perform.
    pub operation: WriteOperation,
}

/// Physical write operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Insert a new record with the given document.
    Insert(Value),
    /// Replace an existing record with the given document.
    Update(Value),
    /// Physically remove the record.
    Delete,
}

impl WriteOperation {
    /// Short label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }
}

/// Backing persistence store behind every unit of work.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Applies all writes atomically and returns the number of affected records.
    async fn apply_changes(&self, writes: Vec<PendingWrite>) -> AppResult<u64>;

    /// Loads one record document by primary key.
    async fn find_by_key(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>>;
}

/// Read-only accessor used by the entity cache on a miss.
///
/// Implementations acquire a fresh unit of work per call and release it before returning.
#[async_trait]
pub trait EntityReader: Send + Sync {
    /// Loads one record document without tracking it.
    async fn find_no_tracking(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>>;
}

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
