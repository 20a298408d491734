use std::sync::Arc;

use async_trait::async_trait;
use keeper_application::{EntityModel, EntityStore, PendingWrite, SchemaModel, WriteOperation};
use keeper_core::{AppError, AppResult};
use keeper_domain::KeyValues;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

mod sql;


/// PostgreSQL entity store: one table per entity type holding the JSON
/// payload plus its projected audit columns.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
    schema: Arc<SchemaModel>,
}

impl PostgresEntityStore {
    /// Creates a store with the provided connection pool and schema model.
    #[must_use]
    pub fn new(pool: PgPool, schema: Arc<SchemaModel>) -> Self {
        Self { pool, schema }
    }

    /// Creates every registered table and adds missing audit columns.
    pub async fn ensure_schema(&self) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        for model in self.schema.entities() {
            for statement in sql::schema_statements(model) {
                sqlx::query(statement.as_str())
                    .execute(&mut *transaction)
                    .await
                    .map_err(|error| {
                        AppError::Internal(format!(
                            "failed to apply schema for table '{}': {error}",
                            model.table
                        ))
                    })?;
            }
            info!(table = %model.table, columns = model.columns.len(), "entity table ready");
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })
    }

    fn model_for(&self, entity_type: &str) -> AppResult<&EntityModel> {
        self.schema.entity(entity_type).ok_or_else(|| {
            AppError::Configuration(format!(
                "entity type '{entity_type}' is not registered in the schema model"
            ))
        })
    }

    async fn apply_write(
        &self,
        transaction: &mut Transaction<'_, Postgres>,
        write: PendingWrite,
    ) -> AppResult<u64> {
        let model = self.model_for(write.entity_type)?;
        let entity_key = write.key_values.storage_key()?;
        let operation = write.operation.as_str();

        let result = match write.operation {
            WriteOperation::Insert(document) => {
                let statement = sql::insert_statement(model);
                sqlx::query(statement.as_str())
                    .bind(entity_key.as_str())
                    .bind(document)
                    .execute(&mut **transaction)
                    .await
            }
            WriteOperation::Update(document) => {
                let statement = sql::update_statement(model);
                sqlx::query(statement.as_str())
                    .bind(entity_key.as_str())
                    .bind(document)
                    .execute(&mut **transaction)
                    .await
            }
            WriteOperation::Delete => {
                let statement = sql::delete_statement(model.table.as_str());
                sqlx::query(statement.as_str())
                    .bind(entity_key.as_str())
                    .execute(&mut **transaction)
                    .await
            }
        };

        let affected = match result {
            Ok(result) => result.rows_affected(),
            Err(error) => {
                if let sqlx::Error::Database(database_error) = &error
                    && database_error.code().as_deref() == Some("23505")
                {
                    return Err(AppError::Conflict(format!(
                        "entity '{}' with key {} already exists",
                        model.table, write.key_values
                    )));
                }

                return Err(AppError::Internal(format!(
                    "failed to {operation} entity '{}' with key {}: {error}",
                    model.table, write.key_values
                )));
            }
        };

        if operation == "update" && affected == 0 {
            return Err(AppError::NotFound(format!(
                "entity '{}' with key {} does not exist",
                model.table, write.key_values
            )));
        }

        Ok(affected)
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn apply_changes(&self, writes: Vec<PendingWrite>) -> AppResult<u64> {
        let write_count = writes.len();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        let mut affected = 0;
        for write in writes {
            affected += self.apply_write(&mut transaction, write).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;
        debug!(write_count, affected, "entity write batch committed");

        Ok(affected)
    }

    async fn find_by_key(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>> {
        let model = self.model_for(entity_type)?;
        let entity_key = key_values.storage_key()?;
        let statement = sql::select_statement(model.table.as_str());

        sqlx::query_scalar::<_, Value>(statement.as_str())
            .bind(entity_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to load entity '{entity_type}' with key {key_values}: {error}"
                ))
            })
    }
}
