//! Audited unit-of-work commits and the read-through entity cache.

#![forbid(unsafe_code)]

mod audit_stamper;
mod blocking;
mod cancellation;
mod change_tracker;
mod entity_cache;
mod persistence_ports;
mod save_pipeline;
mod schema_contribution;
mod unit_of_work;

pub use audit_stamper::{
    stamp_created, stamp_created_by, stamp_deleted, stamp_deleted_by, stamp_restored,
    stamp_updated, stamp_updated_by,
};
pub use blocking::BlockingExecutor;
pub use cancellation::{CancellationSignal, CancellationTrigger, cancellation_pair};
pub use change_tracker::{ChangeEntry, ChangeTracker, EntityState, EntryId, TrackedEntity};
pub use entity_cache::{
    CacheEntryExpiration, CacheKeyIndex, CacheValueStore, DistributedCache, EntityCache,
    EntityCacheOptions,
};
pub use persistence_ports::{
    Clock, EntityReader, EntityStore, PendingWrite, SystemClock, WriteOperation,
};
pub use save_pipeline::{
    ActorPolicy, ActorResolver, AuditIntegration, AuditSaveChangesInterceptor, AuditSettings,
    SaveChangesContext, SaveChangesInterceptor, TenantProvider, TenantSaveChangesInterceptor,
    stamp_pending_changes,
};
pub use schema_contribution::{
    ActorForeignKey, ActorRelationship, AuditColumn, ColumnDefault, ColumnType, EntityModel,
    EntityModelBuilder, ModelBuilder, SchemaModel, validate_identifier,
};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory, UnitOfWorkFactoryBuilder};
