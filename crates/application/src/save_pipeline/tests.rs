use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keeper_core::{AppError, AppResult, TenantId};
use keeper_domain::{
    CreationRecord, CreationRecordable, Entity, EntityCapabilities, KeyValues, MultiTenant,
    SoftDeletionRecord, SoftDeletionRecordable, UpdationRecord, UpdationRecordable,
};

use crate::change_tracker::{ChangeTracker, EntityState, EntryId};
use crate::persistence_ports::Clock;

use super::{
    ActorPolicy, ActorResolver, AuditIntegration, AuditSaveChangesInterceptor, AuditSettings,
    SaveChangesContext, SaveChangesInterceptor, SavePipeline, TenantProvider,
    TenantSaveChangesInterceptor,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: Uuid,
    tenant_id: Option<TenantId>,
    #[serde(flatten)]
    creation: CreationRecord<Uuid>,
    #[serde(flatten)]
    updation: UpdationRecord<Uuid>,
    #[serde(flatten)]
    deletion: SoftDeletionRecord<Uuid>,
    #[serde(skip)]
    archive_on_delete: bool,
}

impl Order {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            creation: CreationRecord::default(),
            updation: UpdationRecord::default(),
            deletion: SoftDeletionRecord::default(),
            archive_on_delete: true,
        }
    }
}

impl Entity for Order {
    const ENTITY_TYPE: &'static str = "orders";

    fn key_values(&self) -> KeyValues {
        KeyValues::single(self.id)
    }
}

impl MultiTenant for Order {
    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn set_tenant_id(&mut self, tenant_id: TenantId) {
        self.tenant_id = Some(tenant_id);
    }
}

impl EntityCapabilities<Uuid> for Order {
    fn creation(&mut self) -> Option<&mut dyn CreationRecordable<Uuid>> {
        Some(&mut self.creation)
    }

    fn updation(&mut self) -> Option<&mut dyn UpdationRecordable<Uuid>> {
        Some(&mut self.updation)
    }

    fn soft_deletion(&mut self) -> Option<&mut dyn SoftDeletionRecordable<Uuid>> {
        Some(&mut self.deletion)
    }

    fn multi_tenant(&mut self) -> Option<&mut dyn MultiTenant> {
        Some(self)
    }

    fn ignores_hard_deletion(&self) -> bool {
        self.archive_on_delete
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

struct FailingActorResolver;

impl ActorResolver<Uuid> for FailingActorResolver {
    fn current_actor(&self) -> AppResult<Option<Uuid>> {
        Err(AppError::Internal("session store offline".to_owned()))
    }
}

struct FixedTenant(TenantId);

impl TenantProvider for FixedTenant {
    fn current_tenant(&self) -> AppResult<TenantId> {
        Ok(self.0)
    }
}

struct CountingInterceptor;

impl SaveChangesInterceptor<Uuid> for CountingInterceptor {
    fn saving_changes(&self, context: &mut SaveChangesContext<'_, Uuid>) -> AppResult<()> {
        if context.entries_mut().count() == 0 {
            return Err(AppError::Validation("nothing to save".to_owned()));
        }
        Ok(())
    }
}

fn commit_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26)
        .single()
        .unwrap_or_default()
}

fn pipeline(
    interceptors: Vec<Arc<dyn SaveChangesInterceptor<Uuid>>>,
    integration: AuditIntegration,
) -> AppResult<SavePipeline<Uuid>> {
    SavePipeline::new(
        Arc::new(FixedClock(commit_time())),
        None,
        interceptors,
        AuditSettings {
            integration,
            actor_policy: ActorPolicy::Optional,
        },
    )
}

fn order_in(tracker: &ChangeTracker<Uuid>, id: EntryId) -> Option<&Order> {
    tracker
        .entry(id)
        .and_then(|entry| entry.entity().as_any().downcast_ref::<Order>())
}

fn track(tracker: &mut ChangeTracker<Uuid>, order: Order, state: EntityState) -> EntryId {
    let id = tracker.track(Box::new(order), state);
    assert!(id.is_ok());
    id.unwrap_or_else(|_| unreachable!())
}

#[test]
fn required_actor_policy_without_resolver_is_rejected() {
    let result = SavePipeline::<Uuid>::new(
        Arc::new(FixedClock(commit_time())),
        None,
        Vec::new(),
        AuditSettings {
            integration: AuditIntegration::BuiltIn,
            actor_policy: ActorPolicy::Required,
        },
    );

    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[test]
fn audit_interceptor_on_built_in_unit_is_rejected() {
    let result = pipeline(
        vec![Arc::new(AuditSaveChangesInterceptor::<Uuid>::new())],
        AuditIntegration::BuiltIn,
    );

    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[test]
fn interceptor_integration_requires_exactly_one_audit_interceptor() {
    let missing = pipeline(Vec::new(), AuditIntegration::Interceptor);
    assert!(matches!(missing, Err(AppError::Configuration(_))));

    let doubled = pipeline(
        vec![
            Arc::new(AuditSaveChangesInterceptor::<Uuid>::new()),
            Arc::new(AuditSaveChangesInterceptor::<Uuid>::new()),
        ],
        AuditIntegration::Interceptor,
    );
    assert!(matches!(doubled, Err(AppError::Configuration(_))));

    let single = pipeline(
        vec![Arc::new(AuditSaveChangesInterceptor::<Uuid>::new())],
        AuditIntegration::Interceptor,
    );
    assert!(single.is_ok());
}

#[test]
fn both_integrations_stamp_added_entities_identically() {
    let actor = Uuid::new_v4();
    for (integration, interceptors) in [
        (AuditIntegration::BuiltIn, Vec::new()),
        (
            AuditIntegration::Interceptor,
            vec![Arc::new(AuditSaveChangesInterceptor::<Uuid>::new())
                as Arc<dyn SaveChangesInterceptor<Uuid>>],
        ),
    ] {
        let pipeline = pipeline(interceptors, integration);
        assert!(pipeline.is_ok());
        let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

        let mut tracker = ChangeTracker::new();
        let id = track(&mut tracker, Order::new(), EntityState::Added);
        assert!(pipeline.run(&mut tracker, commit_time(), Some(actor)).is_ok());

        let order = order_in(&tracker, id);
        assert!(order.is_some());
        let order = order.unwrap_or_else(|| unreachable!());
        assert_eq!(order.creation.created_at, Some(commit_time()));
        assert_eq!(order.creation.created_by, Some(actor));
        assert_eq!(order.updation.updated_at, Some(commit_time()));
        assert_eq!(order.updation.updated_by, Some(actor));
    }
}

#[test]
fn modified_entity_with_deleted_flag_change_is_stamped_deleted() {
    let pipeline = pipeline(Vec::new(), AuditIntegration::BuiltIn);
    assert!(pipeline.is_ok());
    let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

    let mut tracker = ChangeTracker::new();
    let id = track(&mut tracker, Order::new(), EntityState::Unchanged);
    if let Some(entry) = tracker.entry_mut(id) {
        if let Some(deletable) = entry.entity_mut().soft_deletion() {
            deletable.set_is_deleted(true);
        }
    }
    assert!(tracker.detect_changes().is_ok());

    let actor = Uuid::new_v4();
    assert!(pipeline.run(&mut tracker, commit_time(), Some(actor)).is_ok());

    let order = order_in(&tracker, id).cloned();
    assert!(order.is_some());
    let order = order.unwrap_or_else(|| unreachable!());
    assert_eq!(order.updation.updated_at, Some(commit_time()));
    assert_eq!(order.deletion.deleted_at, Some(commit_time()));
    assert_eq!(order.deletion.deleted_by, Some(actor));
    assert_eq!(order.creation.created_at, None);
}

#[test]
fn hard_delete_of_archiving_entity_becomes_soft_delete() {
    let pipeline = pipeline(Vec::new(), AuditIntegration::BuiltIn);
    assert!(pipeline.is_ok());
    let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

    let mut tracker = ChangeTracker::new();
    let id = track(&mut tracker, Order::new(), EntityState::Deleted);
    assert!(pipeline.run(&mut tracker, commit_time(), None).is_ok());

    let entry = tracker.entry(id);
    assert!(entry.is_some());
    let entry = entry.unwrap_or_else(|| unreachable!());
    assert_eq!(entry.state(), EntityState::Modified);

    let order = order_in(&tracker, id);
    assert!(order.is_some());
    let order = order.unwrap_or_else(|| unreachable!());
    assert!(order.deletion.is_deleted);
    assert_eq!(order.deletion.deleted_at, Some(commit_time()));
    assert_eq!(order.deletion.deleted_by, None);
}

#[test]
fn hard_delete_without_archiving_stays_physical() {
    let pipeline = pipeline(Vec::new(), AuditIntegration::BuiltIn);
    assert!(pipeline.is_ok());
    let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

    let mut order = Order::new();
    order.archive_on_delete = false;
    let mut tracker = ChangeTracker::new();
    let id = track(&mut tracker, order, EntityState::Deleted);
    assert!(pipeline.run(&mut tracker, commit_time(), None).is_ok());

    assert_eq!(
        tracker.entry(id).map(|entry| entry.state()),
        Some(EntityState::Deleted)
    );
}

#[test]
fn failing_actor_resolver_degrades_to_anonymous() {
    let pipeline = SavePipeline::new(
        Arc::new(FixedClock(commit_time())),
        Some(Arc::new(FailingActorResolver) as Arc<dyn ActorResolver<Uuid>>),
        Vec::new(),
        AuditSettings::default(),
    );
    assert!(pipeline.is_ok());
    let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

    assert_eq!(pipeline.resolve_actor(), None);
    assert_eq!(pipeline.now(), commit_time());
}

#[test]
fn tenant_interceptor_stamps_new_and_rejects_foreign_entities() {
    let tenant = TenantId::new();
    let pipeline = pipeline(
        vec![Arc::new(TenantSaveChangesInterceptor::new(Arc::new(FixedTenant(
            tenant,
        ))))],
        AuditIntegration::BuiltIn,
    );
    assert!(pipeline.is_ok());
    let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

    let mut tracker = ChangeTracker::new();
    let id = track(&mut tracker, Order::new(), EntityState::Added);
    assert!(pipeline.run(&mut tracker, commit_time(), None).is_ok());
    assert_eq!(order_in(&tracker, id).and_then(|order| order.tenant_id), Some(tenant));

    let mut foreign = Order::new();
    foreign.tenant_id = Some(TenantId::new());
    foreign.archive_on_delete = false;
    let mut tracker = ChangeTracker::new();
    track(&mut tracker, foreign, EntityState::Deleted);

    let result = pipeline.run(&mut tracker, commit_time(), None);
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[test]
fn interceptor_errors_abort_the_commit() {
    let pipeline = pipeline(vec![Arc::new(CountingInterceptor)], AuditIntegration::BuiltIn);
    assert!(pipeline.is_ok());
    let pipeline = pipeline.unwrap_or_else(|_| unreachable!());

    let mut tracker = ChangeTracker::new();
    let result = pipeline.run(&mut tracker, commit_time(), None);
    assert!(matches!(result, Err(AppError::Validation(_))));
}
