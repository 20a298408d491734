//! Capability contracts for audit-trail stamping and soft deletion.
//!
//! An entity opts into each behaviour independently through
//! [`EntityCapabilities`]. The stamping pipeline asks for each view at commit
//! time and skips the ones an entity does not expose.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenancy::MultiTenant;

/// Serialized property name the change tracker inspects for restore/delete transitions.
pub const IS_DELETED_PROPERTY: &str = "is_deleted";

/// Identity type attributed to a commit.
///
/// `()` is the actor key for contexts that do not record who committed.
pub trait ActorKey: Clone + Eq + Debug + Send + Sync + 'static {}

impl ActorKey for () {}
impl ActorKey for Uuid {}
impl ActorKey for String {}
impl ActorKey for i64 {}
impl ActorKey for i32 {}

/// Entity records when it was created and, optionally, by whom.
pub trait CreationRecordable<A: ActorKey> {
    /// Returns the creation timestamp, if stamped.
    fn created_at(&self) -> Option<DateTime<Utc>>;

    /// Overwrites the creation timestamp.
    fn set_created_at(&mut self, created_at: DateTime<Utc>);

    /// Returns the creator slot, or `None` when the entity does not record actors.
    fn created_by_mut(&mut self) -> Option<&mut Option<A>> {
        None
    }
}

/// Entity records when it was last updated and, optionally, by whom.
pub trait UpdationRecordable<A: ActorKey> {
    /// Returns the last update timestamp, if stamped.
    fn updated_at(&self) -> Option<DateTime<Utc>>;

    /// Overwrites the last update timestamp.
    fn set_updated_at(&mut self, updated_at: DateTime<Utc>);

    /// Returns the updater slot, or `None` when the entity does not record actors.
    fn updated_by_mut(&mut self) -> Option<&mut Option<A>> {
        None
    }
}

/// Entity supports soft deletion through an `is_deleted` flag.
pub trait SoftDeletionRecordable<A: ActorKey> {
    /// Returns whether the record is flagged deleted.
    fn is_deleted(&self) -> bool;

    /// Sets the deleted flag.
    fn set_is_deleted(&mut self, is_deleted: bool);

    /// Returns the deletion timestamp, if any.
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    /// Overwrites the deletion timestamp.
    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>);

    /// Returns the deleter slot, or `None` when the entity does not record actors.
    fn deleted_by_mut(&mut self) -> Option<&mut Option<A>> {
        None
    }

    /// Serialized name of the deleted flag.
    fn is_deleted_property(&self) -> &'static str {
        IS_DELETED_PROPERTY
    }
}

/// Capability views an entity exposes to the save pipeline.
///
/// Every view defaults to `None`, so an entity without audit fields only needs
/// an empty `impl`.
pub trait EntityCapabilities<A: ActorKey> {
    /// Creation tracking view.
    fn creation(&mut self) -> Option<&mut dyn CreationRecordable<A>> {
        None
    }

    /// Update tracking view.
    fn updation(&mut self) -> Option<&mut dyn UpdationRecordable<A>> {
        None
    }

    /// Soft deletion view.
    fn soft_deletion(&mut self) -> Option<&mut dyn SoftDeletionRecordable<A>> {
        None
    }

    /// Tenant ownership view.
    fn multi_tenant(&mut self) -> Option<&mut dyn MultiTenant> {
        None
    }

    /// Whether a hard delete must be rewritten into a soft delete.
    ///
    /// Has no effect unless [`EntityCapabilities::soft_deletion`] is also exposed.
    fn ignores_hard_deletion(&self) -> bool {
        false
    }
}

/// Embeddable creation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationRecord<A> {
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Creator, when known.
    #[serde(default)]
    pub created_by: Option<A>,
}

impl<A> Default for CreationRecord<A> {
    fn default() -> Self {
        Self {
            created_at: None,
            created_by: None,
        }
    }
}

impl<A: ActorKey> CreationRecordable<A> for CreationRecord<A> {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn set_created_at(&mut self, created_at: DateTime<Utc>) {
        self.created_at = Some(created_at);
    }

    fn created_by_mut(&mut self) -> Option<&mut Option<A>> {
        Some(&mut self.created_by)
    }
}

/// Embeddable update fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdationRecord<A> {
    /// Last update timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last updater, when known.
    #[serde(default)]
    pub updated_by: Option<A>,
}

impl<A> Default for UpdationRecord<A> {
    fn default() -> Self {
        Self {
            updated_at: None,
            updated_by: None,
        }
    }
}

impl<A: ActorKey> UpdationRecordable<A> for UpdationRecord<A> {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, updated_at: DateTime<Utc>) {
        self.updated_at = Some(updated_at);
    }

    fn updated_by_mut(&mut self) -> Option<&mut Option<A>> {
        Some(&mut self.updated_by)
    }
}

/// Embeddable soft deletion fields.
///
/// Flatten into the entity with `#[serde(flatten)]` so `is_deleted` stays a
/// top-level property the change tracker can observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeletionRecord<A> {
    /// Deleted flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Deletion timestamp.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Deleter, when known.
    #[serde(default)]
    pub deleted_by: Option<A>,
}

impl<A> Default for SoftDeletionRecord<A> {
    fn default() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
        }
    }
}

impl<A: ActorKey> SoftDeletionRecordable<A> for SoftDeletionRecord<A> {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn set_is_deleted(&mut self, is_deleted: bool) {
        self.is_deleted = is_deleted;
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>) {
        self.deleted_at = deleted_at;
    }

    fn deleted_by_mut(&mut self) -> Option<&mut Option<A>> {
        Some(&mut self.deleted_by)
    }
}
