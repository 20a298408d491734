//! Snapshot-based change tracking for a unit of work.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde_json::Value;

use keeper_core::{AppError, AppResult};
use keeper_domain::{ActorKey, Entity, EntityCapabilities, KeyValues};

use crate::persistence_ports::{PendingWrite, WriteOperation};


/// Pending change state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Tracked and identical to its last persisted snapshot.
    Unchanged,
    /// New entity awaiting insert.
    Added,
    /// Persisted entity with pending modifications.
    Modified,
    /// Persisted entity awaiting physical removal.
    Deleted,
}

impl EntityState {
    /// Stable label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// Handle to one tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl Display for EntryId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "entry-{}", self.0)
    }
}

/// Object-safe view of an entity held by the change tracker.
pub trait TrackedEntity<A: ActorKey>: EntityCapabilities<A> + Send + Sync {
    /// Entity type name.
    fn entity_type(&self) -> &'static str;

    /// Primary-key tuple.
    fn key_values(&self) -> KeyValues;

    /// Serialized document used for snapshots and writes.
    fn to_document(&self) -> AppResult<Value>;

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<A, T> TrackedEntity<A> for T
where
    A: ActorKey,
    T: Entity + EntityCapabilities<A>,
{
    fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    fn key_values(&self) -> KeyValues {
        Entity::key_values(self)
    }

    fn to_document(&self) -> AppResult<Value> {
        serde_json::to_value(self).map_err(|error| {
            AppError::Internal(format!(
                "failed to serialize entity '{}': {error}",
                T::ENTITY_TYPE
            ))
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One tracked entity with its state and original snapshot.
pub struct ChangeEntry<A: ActorKey> {
    id: EntryId,
    entity: Box<dyn TrackedEntity<A>>,
    state: EntityState,
    original: Option<Value>,
    modified_properties: BTreeSet<String>,
}

impl<A: ActorKey> ChangeEntry<A> {
    /// Entry handle.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Current change state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Rewrites the pending operation of this entry.
    pub fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    /// Tracked entity.
    #[must_use]
    pub fn entity(&self) -> &dyn TrackedEntity<A> {
        &*self.entity
    }

    /// Mutable tracked entity.
    pub fn entity_mut(&mut self) -> &mut dyn TrackedEntity<A> {
        &mut *self.entity
    }

    /// Whether a top-level property differs from the original snapshot.
    #[must_use]
    pub fn is_property_modified(&self, property: &str) -> bool {
        self.modified_properties.contains(property)
    }

    /// Marks a property as modified regardless of the snapshot diff.
    pub fn mark_property_modified(&mut self, property: &str) {
        self.modified_properties.insert(property.to_owned());
    }

    /// Properties detected as modified, sorted.
    pub fn modified_properties(&self) -> impl Iterator<Item = &str> {
        self.modified_properties.iter().map(String::as_str)
    }

    fn matches(&self, entity_type: &str, key_values: &KeyValues) -> bool {
        self.entity.entity_type() == entity_type && &self.entity.key_values() == key_values
    }
}

/// Set of entities participating in one unit of work.
pub struct ChangeTracker<A: ActorKey> {
    entries: Vec<ChangeEntry<A>>,
    next_id: u64,
}

impl<A: ActorKey> Default for ChangeTracker<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }
}

impl<A: ActorKey> ChangeTracker<A> {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking an entity in the given state.
    ///
    /// Entities in `Unchanged`, `Modified` or `Deleted` state keep their current
    /// document as the original snapshot.
    pub fn track(
        &mut self,
        entity: Box<dyn TrackedEntity<A>>,
        state: EntityState,
    ) -> AppResult<EntryId> {
        let entity_type = entity.entity_type();
        let key_values = entity.key_values();
        if self.find(entity_type, &key_values).is_some() {
            return Err(AppError::Conflict(format!(
                "entity '{entity_type}' with key {key_values} is already tracked"
            )));
        }

        let original = match state {
            EntityState::Added => None,
            _ => Some(entity.to_document()?),
        };

        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(ChangeEntry {
            id,
            entity,
            state,
            original,
            modified_properties: BTreeSet::new(),
        });

        Ok(id)
    }

    /// Finds the entry tracking the given record.
    #[must_use]
    pub fn find(&self, entity_type: &str, key_values: &KeyValues) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|entry| entry.matches(entity_type, key_values))
            .map(ChangeEntry::id)
    }

    /// Returns one entry.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&ChangeEntry<A>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Returns one mutable entry.
    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut ChangeEntry<A>> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Iterates entries in tracking order.
    pub fn entries(&self) -> impl Iterator<Item = &ChangeEntry<A>> {
        self.entries.iter()
    }

    /// Iterates mutable entries in tracking order.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut ChangeEntry<A>> {
        self.entries.iter_mut()
    }

    /// Stops tracking an entry.
    pub fn detach(&mut self, id: EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compares every persisted entry against its snapshot.
    ///
    /// `Unchanged` entries whose document differs are promoted to `Modified`;
    /// the differing top-level properties are recorded on the entry.
    pub fn detect_changes(&mut self) -> AppResult<()> {
        for entry in &mut self.entries {
            if !matches!(entry.state, EntityState::Unchanged | EntityState::Modified) {
                continue;
            }
            let Some(original) = entry.original.as_ref() else {
                continue;
            };

            let current = entry.entity.to_document()?;
            let changed = changed_properties(original, &current);
            if changed.is_empty() {
                continue;
            }

            entry.modified_properties.extend(changed);
            entry.state = EntityState::Modified;
        }

        Ok(())
    }

    /// Whether any entry has a pending write.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.state != EntityState::Unchanged)
    }

    /// Builds the write batch for every pending entry.
    pub fn pending_writes(&self) -> AppResult<Vec<PendingWrite>> {
        let mut writes = Vec::new();
        for entry in &self.entries {
            let operation = match entry.state {
                EntityState::Unchanged => continue,
                EntityState::Added => WriteOperation::Insert(entry.entity.to_document()?),
                EntityState::Modified => WriteOperation::Update(entry.entity.to_document()?),
                EntityState::Deleted => WriteOperation::Delete,
            };

            writes.push(PendingWrite {
                entity_type: entry.entity.entity_type(),
                key_values: entry.entity.key_values(),
                operation,
            });
        }

        Ok(writes)
    }

    /// Marks the flushed state as the new baseline.
    ///
    /// Deleted entries are detached; every other entry becomes `Unchanged`
    /// with a fresh snapshot.
    pub fn accept_all_changes(&mut self) -> AppResult<()> {
        self.entries
            .retain(|entry| entry.state != EntityState::Deleted);

        for entry in &mut self.entries {
            entry.original = Some(entry.entity.to_document()?);
            entry.state = EntityState::Unchanged;
            entry.modified_properties.clear();
        }

        Ok(())
    }
}

fn changed_properties(original: &Value, current: &Value) -> BTreeSet<String> {
    match (original, current) {
        (Value::Object(original), Value::Object(current)) => original
            .keys()
            .chain(current.keys())
            .filter(|property| original.get(*property) != current.get(*property))
            .cloned()
            .collect(),
        _ if original != current => BTreeSet::from([String::new()]),
        _ => BTreeSet::new(),
    }
}
