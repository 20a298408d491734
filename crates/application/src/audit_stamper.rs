//! Stateless audit field mutations.
//!
//! Every function is total: an entity that does not expose the relevant
//! capability is returned untouched.

use chrono::{DateTime, Utc};
use keeper_domain::{ActorKey, EntityCapabilities};

/// Stamps the creation timestamp.
pub fn stamp_created<A, E>(entity: &mut E, now: DateTime<Utc>)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(creatable) = entity.creation() {
        creatable.set_created_at(now);
    }
}

/// Stamps the creator.
pub fn stamp_created_by<A, E>(entity: &mut E, actor: Option<A>)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(slot) = entity
        .creation()
        .and_then(|creatable| creatable.created_by_mut())
    {
        *slot = actor;
    }
}

/// Stamps the last update timestamp.
pub fn stamp_updated<A, E>(entity: &mut E, now: DateTime<Utc>)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(updatable) = entity.updation() {
        updatable.set_updated_at(now);
    }
}

/// Stamps the last updater.
pub fn stamp_updated_by<A, E>(entity: &mut E, actor: Option<A>)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(slot) = entity
        .updation()
        .and_then(|updatable| updatable.updated_by_mut())
    {
        *slot = actor;
    }
}

/// Stamps the deletion timestamp. Does not touch the deleted flag.
pub fn stamp_deleted<A, E>(entity: &mut E, now: DateTime<Utc>)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(deletable) = entity.soft_deletion() {
        deletable.set_deleted_at(Some(now));
    }
}

/// Stamps the deleter.
pub fn stamp_deleted_by<A, E>(entity: &mut E, actor: Option<A>)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(slot) = entity
        .soft_deletion()
        .and_then(|deletable| deletable.deleted_by_mut())
    {
        *slot = actor;
    }
}

/// Clears deletion timestamp and deleter after a restore.
///
/// Both fields go back to `None`, the same value a never-deleted record carries.
pub fn stamp_restored<A, E>(entity: &mut E)
where
    A: ActorKey,
    E: EntityCapabilities<A> + ?Sized,
{
    if let Some(deletable) = entity.soft_deletion() {
        deletable.set_deleted_at(None);
        if let Some(slot) = deletable.deleted_by_mut() {
            *slot = None;
        }
    }
}
