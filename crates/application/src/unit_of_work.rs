//! Unit of work: change tracking plus an audited commit.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use keeper_core::{AppError, AppResult};
use keeper_domain::{ActorKey, Entity, EntityCapabilities, KeyValues};

use crate::cancellation::CancellationSignal;
use crate::change_tracker::{ChangeTracker, EntityState, EntryId};
use crate::persistence_ports::EntityStore;
use crate::save_pipeline::SavePipeline;

mod factory;


pub use factory::{UnitOfWorkFactory, UnitOfWorkFactoryBuilder};

/// One batch of tracked entity changes committed atomically.
pub struct UnitOfWork<A: ActorKey> {
    tracker: ChangeTracker<A>,
    store: Arc<dyn EntityStore>,
    pipeline: Arc<SavePipeline<A>>,
}

impl<A: ActorKey> UnitOfWork<A> {
    pub(crate) fn new(store: Arc<dyn EntityStore>, pipeline: Arc<SavePipeline<A>>) -> Self {
        Self {
            tracker: ChangeTracker::new(),
            store,
            pipeline,
        }
    }

    /// Tracks a new entity for insertion.
    pub fn add<T>(&mut self, entity: T) -> AppResult<EntryId>
    where
        T: Entity + EntityCapabilities<A>,
    {
        self.tracker.track(Box::new(entity), EntityState::Added)
    }

    /// Tracks an already persisted entity as unchanged.
    pub fn attach<T>(&mut self, entity: T) -> AppResult<EntryId>
    where
        T: Entity + EntityCapabilities<A>,
    {
        self.tracker.track(Box::new(entity), EntityState::Unchanged)
    }

    /// Returns the tracked entry for a key, loading and attaching it on first access.
    pub async fn find<T>(&mut self, key_values: &KeyValues) -> AppResult<Option<EntryId>>
    where
        T: Entity + EntityCapabilities<A>,
    {
        if let Some(id) = self.tracker.find(T::ENTITY_TYPE, key_values) {
            return Ok(Some(id));
        }

        let Some(entity) = self.find_no_tracking::<T>(key_values).await? else {
            return Ok(None);
        };

        self.attach(entity).map(Some)
    }

    /// Loads an entity without tracking it.
    pub async fn find_no_tracking<T: Entity>(&self, key_values: &KeyValues) -> AppResult<Option<T>> {
        self.find_document_no_tracking(T::ENTITY_TYPE, key_values)
            .await?
            .map(|document| {
                serde_json::from_value(document).map_err(|error| {
                    AppError::Internal(format!(
                        "failed to decode entity '{}' with key {key_values}: {error}",
                        T::ENTITY_TYPE
                    ))
                })
            })
            .transpose()
    }

    /// Loads a raw entity document without tracking it.
    pub async fn find_document_no_tracking(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>> {
        self.store.find_by_key(entity_type, key_values).await
    }

    /// Typed access to a tracked entity.
    #[must_use]
    pub fn get<T: Entity>(&self, id: EntryId) -> Option<&T> {
        self.tracker
            .entry(id)
            .and_then(|entry| entry.entity().as_any().downcast_ref::<T>())
    }

    /// Typed mutable access to a tracked entity.
    ///
    /// Mutations are picked up by change detection on the next commit.
    pub fn get_mut<T: Entity>(&mut self, id: EntryId) -> Option<&mut T> {
        self.tracker
            .entry_mut(id)
            .and_then(|entry| entry.entity_mut().as_any_mut().downcast_mut::<T>())
    }

    /// Pending state of one entry, `None` once detached.
    #[must_use]
    pub fn entry_state(&self, id: EntryId) -> Option<EntityState> {
        self.tracker.entry(id).map(|entry| entry.state())
    }

    /// Requests physical removal. Added entries are simply detached.
    pub fn remove(&mut self, id: EntryId) -> AppResult<()> {
        let entry = self
            .tracker
            .entry_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("tracked entry {id} not found")))?;

        if entry.state() == EntityState::Added {
            self.tracker.detach(id);
        } else {
            entry.set_state(EntityState::Deleted);
        }

        Ok(())
    }

    /// Flags a soft-deletable entity as deleted.
    pub fn soft_remove(&mut self, id: EntryId) -> AppResult<()> {
        let entry = self
            .tracker
            .entry_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("tracked entry {id} not found")))?;
        let entity_type = entry.entity().entity_type();

        let deletable = entry.entity_mut().soft_deletion().ok_or_else(|| {
            AppError::Validation(format!(
                "entity type '{entity_type}' does not support soft deletion"
            ))
        })?;
        deletable.set_is_deleted(true);

        Ok(())
    }

    /// Flags several soft-deletable entities as deleted.
    pub fn soft_remove_range(&mut self, ids: &[EntryId]) -> AppResult<()> {
        ids.iter().try_for_each(|id| self.soft_remove(*id))
    }

    /// Whether a commit would issue any write.
    pub fn has_changes(&mut self) -> AppResult<bool> {
        self.tracker.detect_changes()?;
        Ok(self.tracker.has_pending_writes())
    }

    /// Commits every pending change.
    ///
    /// Stamping runs over the final change set before the first write is
    /// issued; the flush is a single atomic batch.
    pub async fn save_changes(&mut self) -> AppResult<u64> {
        self.tracker.detect_changes()?;

        let now = self.pipeline.now();
        let actor = self.pipeline.resolve_actor();
        self.pipeline.run(&mut self.tracker, now, actor)?;

        let writes = self.tracker.pending_writes()?;
        if writes.is_empty() {
            return Ok(0);
        }

        let write_count = writes.len();
        let affected = self.store.apply_changes(writes).await?;
        self.tracker.accept_all_changes()?;

        debug!(
            write_count,
            affected,
            commit_time = %now,
            "unit of work committed"
        );

        Ok(affected)
    }

    /// Commits every pending change unless the signal fires first.
    ///
    /// A cancelled commit leaves the backing store untouched as long as the
    /// store rolls back an abandoned batch.
    pub async fn save_changes_with_cancellation(
        &mut self,
        signal: &CancellationSignal,
    ) -> AppResult<u64> {
        signal.guard("unit of work commit", self.save_changes()).await
    }
}
