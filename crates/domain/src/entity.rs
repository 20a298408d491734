use std::fmt::{Display, Formatter};

use keeper_core::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted record addressable by an ordered primary-key tuple.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable entity type name used in cache keys and as the storage table name.
    const ENTITY_TYPE: &'static str;

    /// Returns the primary-key tuple of this record.
    fn key_values(&self) -> KeyValues;
}

/// One component of a primary-key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// Integer key component.
    Int(i64),
    /// UUID key component.
    Uuid(Uuid),
    /// Free-form text key component.
    Text(String),
}

impl Display for KeyValue {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(formatter, "{value}"),
            Self::Uuid(value) => write!(formatter, "{value}"),
            Self::Text(value) => formatter.write_str(value.as_str()),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Non-empty, order-significant primary-key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyValue>")]
pub struct KeyValues(Vec<KeyValue>);

impl TryFrom<Vec<KeyValue>> for KeyValues {
    type Error = AppError;

    fn try_from(values: Vec<KeyValue>) -> AppResult<Self> {
        Self::new(values)
    }
}

impl KeyValues {
    /// Creates a key tuple, rejecting an empty component list.
    pub fn new(values: Vec<KeyValue>) -> AppResult<Self> {
        if values.is_empty() {
            return Err(AppError::Validation(
                "primary key tuple must contain at least one component".to_owned(),
            ));
        }

        Ok(Self(values))
    }

    /// Creates a single-component key tuple.
    #[must_use]
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self(vec![value.into()])
    }

    /// Builds a key tuple from nullable components.
    ///
    /// Returns `None` when the slice is empty or any component is absent.
    #[must_use]
    pub fn from_optional(values: &[Option<KeyValue>]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        values
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// Returns the key components in order.
    #[must_use]
    pub fn as_slice(&self) -> &[KeyValue] {
        self.0.as_slice()
    }

    /// Returns the number of key components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the tuple has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encodes the tuple as the JSON array stored in the `entity_key` column.
    pub fn storage_key(&self) -> AppResult<String> {
        serde_json::to_string(&self.0).map_err(|error| {
            AppError::Internal(format!("failed to encode primary key {self}: {error}"))
        })
    }

    /// Decodes a tuple previously produced by [`KeyValues::storage_key`].
    pub fn from_storage_key(value: &str) -> AppResult<Self> {
        let components: Vec<KeyValue> = serde_json::from_str(value).map_err(|error| {
            AppError::Internal(format!("invalid stored primary key '{value}': {error}"))
        })?;
        Self::new(components)
    }
}

impl Display for KeyValues {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("{")?;
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str(",")?;
            }
            write!(formatter, "{value}")?;
        }
        formatter.write_str("}")
    }
}

impl From<KeyValue> for KeyValues {
    fn from(value: KeyValue) -> Self {
        Self(vec![value])
    }
}
