//! Model-time declaration of audit columns and actor relationships.
//!
//! Entity types are registered explicitly; storage adapters render the
//! resulting [`SchemaModel`] into their own DDL.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keeper_core::{AppError, AppResult};
use keeper_domain::{Entity, IS_DELETED_PROPERTY};

/// Storage type of an audit column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// UTC timestamp.
    Timestamp,
    /// Boolean flag.
    Boolean,
    /// UUID identifier.
    Uuid,
    /// Free-form text.
    Text,
    /// 64-bit integer.
    BigInt,
    /// 32-bit integer.
    Integer,
}

impl ColumnType {
    /// Stable label used in logs and serialized models.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Text => "text",
            Self::BigInt => "big_int",
            Self::Integer => "integer",
        }
    }
}

/// Value generated by the store when a write leaves the column empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// Current UTC time.
    UtcNow,
    /// Boolean `false`.
    False,
    /// No generated value.
    None,
}

/// Actor table audit `*_by` columns reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRelationship {
    /// Actor table name.
    pub table: String,
    /// Primary key column of the actor table.
    pub key_column: String,
    /// Storage type of the actor key.
    pub column_type: ColumnType,
}

/// Reference from an audit column to the actor table.
///
/// Deleting an actor nulls the reference instead of cascading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorForeignKey {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
}

/// One audit column contributed by a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditColumn {
    /// Column name, identical to the serialized property name.
    pub name: String,
    /// Storage type.
    pub column_type: ColumnType,
    /// Whether the column accepts `NULL`.
    pub nullable: bool,
    /// Generated value for empty writes.
    pub default: ColumnDefault,
    /// Actor reference, for `*_by` columns.
    pub references: Option<ActorForeignKey>,
}

impl AuditColumn {
    fn stamped(name: &str, column_type: ColumnType, nullable: bool, default: ColumnDefault) -> Self {
        Self {
            name: name.to_owned(),
            column_type,
            nullable,
            default,
            references: None,
        }
    }

    fn actor(name: &str, actor: &ActorRelationship) -> Self {
        Self {
            name: name.to_owned(),
            column_type: actor.column_type,
            nullable: true,
            default: ColumnDefault::None,
            references: Some(ActorForeignKey {
                table: actor.table.clone(),
                column: actor.key_column.clone(),
            }),
        }
    }
}

/// Audit columns of one entity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityModel {
    /// Table name.
    pub table: String,
    /// Audit columns in declaration order.
    pub columns: Vec<AuditColumn>,
}

impl EntityModel {
    /// Finds a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&AuditColumn> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Validated schema contribution for every registered entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModel {
    entities: BTreeMap<String, EntityModel>,
}

impl SchemaModel {
    /// Returns the model of one table.
    #[must_use]
    pub fn entity(&self, table: &str) -> Option<&EntityModel> {
        self.entities.get(table)
    }

    /// Iterates models sorted by table name.
    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    /// Number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no table is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Capability declaration for one entity table.
#[derive(Debug, Clone, Default)]
pub struct EntityModelBuilder {
    creation: bool,
    updation: bool,
    soft_deletion: bool,
    multi_tenant: bool,
    actor: Option<ActorRelationship>,
}

impl EntityModelBuilder {
    /// Adds `created_at`.
    pub fn creation_recordable(&mut self) -> &mut Self {
        self.creation = true;
        self
    }

    /// Adds `updated_at`.
    pub fn updation_recordable(&mut self) -> &mut Self {
        self.updation = true;
        self
    }

    /// Adds `is_deleted` and `deleted_at`.
    pub fn soft_deletion_recordable(&mut self) -> &mut Self {
        self.soft_deletion = true;
        self
    }

    /// Adds `tenant_id`.
    pub fn multi_tenant(&mut self) -> &mut Self {
        self.multi_tenant = true;
        self
    }

    /// Adds a `*_by` column referencing the actor table for each declared capability.
    pub fn with_actor(&mut self, actor: ActorRelationship) -> &mut Self {
        self.actor = Some(actor);
        self
    }

    fn build(&self, table: &str) -> AppResult<EntityModel> {
        validate_identifier(table)?;
        if let Some(actor) = &self.actor {
            validate_identifier(&actor.table)?;
            validate_identifier(&actor.key_column)?;
            if !(self.creation || self.updation || self.soft_deletion) {
                return Err(AppError::Configuration(format!(
                    "table '{table}' declares an actor without any audit capability"
                )));
            }
        }

        let mut columns = Vec::new();
        if self.creation {
            columns.push(AuditColumn::stamped(
                "created_at",
                ColumnType::Timestamp,
                false,
                ColumnDefault::UtcNow,
            ));
            columns.extend(self.actor.as_ref().map(|actor| AuditColumn::actor("created_by", actor)));
        }
        if self.updation {
            columns.push(AuditColumn::stamped(
                "updated_at",
                ColumnType::Timestamp,
                false,
                ColumnDefault::UtcNow,
            ));
            columns.extend(self.actor.as_ref().map(|actor| AuditColumn::actor("updated_by", actor)));
        }
        if self.soft_deletion {
            columns.push(AuditColumn::stamped(
                IS_DELETED_PROPERTY,
                ColumnType::Boolean,
                false,
                ColumnDefault::False,
            ));
            columns.push(AuditColumn::stamped(
                "deleted_at",
                ColumnType::Timestamp,
                true,
                ColumnDefault::None,
            ));
            columns.extend(self.actor.as_ref().map(|actor| AuditColumn::actor("deleted_by", actor)));
        }
        if self.multi_tenant {
            columns.push(AuditColumn::stamped(
                "tenant_id",
                ColumnType::Uuid,
                true,
                ColumnDefault::None,
            ));
        }

        Ok(EntityModel {
            table: table.to_owned(),
            columns,
        })
    }
}

/// Explicit registry of entity tables and their audit capabilities.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    entities: BTreeMap<String, EntityModelBuilder>,
}

impl ModelBuilder {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the declaration for a table, registering it on first use.
    pub fn entity(&mut self, table: &str) -> &mut EntityModelBuilder {
        self.entities.entry(table.to_owned()).or_default()
    }

    /// Returns the declaration for an entity type's table.
    pub fn entity_for<T: Entity>(&mut self) -> &mut EntityModelBuilder {
        self.entity(T::ENTITY_TYPE)
    }

    /// Validates every declaration and produces the schema model.
    pub fn build(&self) -> AppResult<SchemaModel> {
        let entities = self
            .entities
            .iter()
            .map(|(table, builder)| Ok((table.clone(), builder.build(table)?)))
            .collect::<AppResult<BTreeMap<_, _>>>()?;

        Ok(SchemaModel { entities })
    }
}

/// Accepts lowercase SQL identifiers: `[a-z_][a-z0-9_]*`.
pub fn validate_identifier(identifier: &str) -> AppResult<()> {
    let mut characters = identifier.chars();
    let valid_start = characters
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_');
    let valid_rest =
        characters.all(|character| character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(AppError::Configuration(format!(
            "'{identifier}' is not a valid identifier"
        )))
    }
}
