use std::marker::PhantomData;

use tracing::debug;

use keeper_core::AppResult;
use keeper_domain::ActorKey;

use crate::audit_stamper::{
    stamp_created, stamp_created_by, stamp_deleted, stamp_deleted_by, stamp_restored,
    stamp_updated, stamp_updated_by,
};
use crate::change_tracker::EntityState;

use super::{AuditIntegration, SaveChangesContext, SaveChangesInterceptor};

/// Runs the audit state machine over every pending entry of one commit.
///
/// | state | action |
/// |---|---|
/// | added | created + updated |
/// | modified | updated; deleted or restored when the deleted flag changed |
/// | deleted | rewritten to a soft delete for entities ignoring hard deletion |
pub fn stamp_pending_changes<A: ActorKey>(context: &mut SaveChangesContext<'_, A>) {
    let now = context.now();
    let actor = context.actor().cloned();

    for entry in context.entries_mut() {
        match entry.state() {
            EntityState::Added => {
                let entity = entry.entity_mut();
                stamp_created::<A, _>(entity, now);
                stamp_created_by(entity, actor.clone());
                stamp_updated::<A, _>(entity, now);
                stamp_updated_by(entity, actor.clone());
            }
            EntityState::Modified => {
                let deleted_flag = entry.entity_mut().soft_deletion().map(|deletable| {
                    (deletable.is_deleted_property(), deletable.is_deleted())
                });
                let deleted_transition = deleted_flag.and_then(|(property, is_deleted)| {
                    entry.is_property_modified(property).then_some(is_deleted)
                });

                let entity = entry.entity_mut();
                stamp_updated::<A, _>(entity, now);
                stamp_updated_by(entity, actor.clone());

                match deleted_transition {
                    Some(true) => {
                        stamp_deleted::<A, _>(entity, now);
                        stamp_deleted_by(entity, actor.clone());
                    }
                    Some(false) => stamp_restored::<A, _>(entity),
                    None => {}
                }
            }
            EntityState::Deleted => {
                if !entry.entity().ignores_hard_deletion() {
                    continue;
                }
                let Some(property) = entry.entity_mut().soft_deletion().map(|deletable| {
                    deletable.set_is_deleted(true);
                    deletable.is_deleted_property()
                }) else {
                    continue;
                };

                entry.set_state(EntityState::Modified);
                entry.mark_property_modified(property);

                let entity = entry.entity_mut();
                stamp_deleted::<A, _>(entity, now);
                stamp_deleted_by(entity, actor.clone());
                debug!(
                    entity_type = entity.entity_type(),
                    key = %entity.key_values(),
                    "rewrote hard delete into soft delete"
                );
            }
            EntityState::Unchanged => {}
        }
    }
}

/// Externally attached audit stamping for unit-of-work types without built-in stamping.
pub struct AuditSaveChangesInterceptor<A: ActorKey> {
    _actor: PhantomData<fn() -> A>,
}

impl<A: ActorKey> AuditSaveChangesInterceptor<A> {
    /// Creates the interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _actor: PhantomData,
        }
    }
}

impl<A: ActorKey> Default for AuditSaveChangesInterceptor<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ActorKey> SaveChangesInterceptor<A> for AuditSaveChangesInterceptor<A> {
    fn saving_changes(&self, context: &mut SaveChangesContext<'_, A>) -> AppResult<()> {
        if context.integration() == AuditIntegration::BuiltIn {
            debug!("unit of work stamps audit fields itself, skipping interceptor");
            return Ok(());
        }

        stamp_pending_changes(context);
        Ok(())
    }

    fn stamps_audit_fields(&self) -> bool {
        true
    }
}
