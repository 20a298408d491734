//! Commit-time hooks that run after change detection and before the flush.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use keeper_core::{AppError, AppResult};
use keeper_domain::ActorKey;

use crate::change_tracker::{ChangeEntry, ChangeTracker};
use crate::persistence_ports::Clock;

mod audit;
mod tenancy;

#[cfg(test)]
mod tests;

pub use audit::{AuditSaveChangesInterceptor, stamp_pending_changes};
pub use tenancy::{TenantProvider, TenantSaveChangesInterceptor};

/// Which component stamps audit fields for a unit-of-work type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditIntegration {
    /// The unit of work stamps inside its own commit.
    #[default]
    BuiltIn,
    /// An externally registered [`AuditSaveChangesInterceptor`] stamps.
    Interceptor,
}

/// Whether every commit must be attributable to an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActorPolicy {
    /// Commits without a resolvable actor stamp `None`.
    #[default]
    Optional,
    /// An actor resolver must be configured at startup.
    Required,
}

/// Audit configuration decided once when the unit-of-work factory is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditSettings {
    /// Stamping integration shape.
    pub integration: AuditIntegration,
    /// Actor requirement.
    pub actor_policy: ActorPolicy,
}

/// Resolves who is committing.
pub trait ActorResolver<A: ActorKey>: Send + Sync {
    /// Returns the current actor, `None` for anonymous or system writes.
    fn current_actor(&self) -> AppResult<Option<A>>;
}

/// Mutable view of one commit handed to interceptors.
pub struct SaveChangesContext<'a, A: ActorKey> {
    tracker: &'a mut ChangeTracker<A>,
    now: DateTime<Utc>,
    actor: Option<A>,
    integration: AuditIntegration,
}

impl<'a, A: ActorKey> SaveChangesContext<'a, A> {
    pub(crate) fn new(
        tracker: &'a mut ChangeTracker<A>,
        now: DateTime<Utc>,
        actor: Option<A>,
        integration: AuditIntegration,
    ) -> Self {
        Self {
            tracker,
            now,
            actor,
            integration,
        }
    }

    /// Commit timestamp shared by every entity in this commit.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Actor resolved once for this commit.
    #[must_use]
    pub fn actor(&self) -> Option<&A> {
        self.actor.as_ref()
    }

    /// Integration shape of the committing unit of work.
    #[must_use]
    pub fn integration(&self) -> AuditIntegration {
        self.integration
    }

    /// Pending entries, in tracking order.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut ChangeEntry<A>> {
        self.tracker.entries_mut()
    }
}

/// Hook invoked once per commit before any write is issued.
///
/// Implementations only mutate tracked entities in memory.
pub trait SaveChangesInterceptor<A: ActorKey>: Send + Sync {
    /// Inspects and mutates the pending change set.
    fn saving_changes(&self, context: &mut SaveChangesContext<'_, A>) -> AppResult<()>;

    /// Whether this interceptor stamps audit fields.
    fn stamps_audit_fields(&self) -> bool {
        false
    }
}

/// Commit-time collaborators shared by every unit of work of one factory.
pub(crate) struct SavePipeline<A: ActorKey> {
    clock: Arc<dyn Clock>,
    actor_resolver: Option<Arc<dyn ActorResolver<A>>>,
    interceptors: Vec<Arc<dyn SaveChangesInterceptor<A>>>,
    settings: AuditSettings,
}

impl<A: ActorKey> SavePipeline<A> {
    pub(crate) fn new(
        clock: Arc<dyn Clock>,
        actor_resolver: Option<Arc<dyn ActorResolver<A>>>,
        interceptors: Vec<Arc<dyn SaveChangesInterceptor<A>>>,
        settings: AuditSettings,
    ) -> AppResult<Self> {
        if settings.actor_policy == ActorPolicy::Required && actor_resolver.is_none() {
            return Err(AppError::Configuration(
                "an actor resolver is required when the actor policy is 'required'".to_owned(),
            ));
        }

        let audit_interceptors = interceptors
            .iter()
            .filter(|interceptor| interceptor.stamps_audit_fields())
            .count();
        match settings.integration {
            AuditIntegration::BuiltIn if audit_interceptors > 0 => {
                return Err(AppError::Configuration(
                    "audit interceptor registered for a unit of work that stamps built-in"
                        .to_owned(),
                ));
            }
            AuditIntegration::Interceptor if audit_interceptors != 1 => {
                return Err(AppError::Configuration(format!(
                    "interceptor audit integration needs exactly one audit interceptor, found {audit_interceptors}"
                )));
            }
            _ => {}
        }

        Ok(Self {
            clock,
            actor_resolver,
            interceptors,
            settings,
        })
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Resolves the commit actor; failures degrade to an anonymous commit.
    pub(crate) fn resolve_actor(&self) -> Option<A> {
        let resolver = self.actor_resolver.as_ref()?;
        match resolver.current_actor() {
            Ok(actor) => actor,
            Err(error) => {
                warn!(error = %error, "actor resolution failed, committing without actor");
                None
            }
        }
    }

    pub(crate) fn run(
        &self,
        tracker: &mut ChangeTracker<A>,
        now: DateTime<Utc>,
        actor: Option<A>,
    ) -> AppResult<()> {
        let mut context = SaveChangesContext::new(tracker, now, actor, self.settings.integration);

        if self.settings.integration == AuditIntegration::BuiltIn {
            stamp_pending_changes(&mut context);
        }

        for interceptor in &self.interceptors {
            interceptor.saving_changes(&mut context)?;
        }

        Ok(())
    }
}
