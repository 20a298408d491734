//! Domain contracts for audited, cacheable entities.

#![forbid(unsafe_code)]

mod audit;
mod entity;
mod tenancy;

pub use audit::{
    ActorKey, CreationRecord, CreationRecordable, EntityCapabilities, IS_DELETED_PROPERTY,
    SoftDeletionRecord, SoftDeletionRecordable, UpdationRecord, UpdationRecordable,
};
pub use entity::{Entity, KeyValue, KeyValues};
pub use tenancy::MultiTenant;
