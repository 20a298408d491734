//! Keeper entity cache probe.

#![forbid(unsafe_code)]

mod probe_config;

use std::sync::Arc;

use keeper_application::{
    CancellationSignal, DistributedCache, EntityCache, UnitOfWorkFactory, cancellation_pair,
};
use keeper_core::{AppError, AppResult};
use keeper_infrastructure::{InMemoryDistributedCache, PostgresEntityStore, RedisDistributedCache};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::probe_config::{ProbeCommand, ProbeConfig, init_tracing};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ProbeConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let store = Arc::new(PostgresEntityStore::new(pool, Arc::new(config.schema.clone())));

    info!(
        key_prefix = %config.cache_options.key_prefix(),
        entity_types = config.schema.len(),
        redis = config.redis_url.is_some(),
        "keeper-probe started"
    );

    match config.command.clone() {
        ProbeCommand::Migrate => {
            store.ensure_schema().await?;
            info!("entity schema applied");
        }
        ProbeCommand::Get {
            entity_type,
            key_values,
        } => {
            let cache = build_cache(&config, store)?;
            let signal = interrupt_signal();
            let document = signal
                .guard(
                    "probe read",
                    cache.get_document(entity_type.as_str(), &key_values),
                )
                .await?;

            match document {
                Some(document) => {
                    let rendered = serde_json::to_string_pretty(&document).map_err(|error| {
                        AppError::Internal(format!("failed to render entity: {error}"))
                    })?;
                    println!("{rendered}");
                }
                None => warn!(entity_type = %entity_type, key = %key_values, "entity not found"),
            }
        }
        ProbeCommand::Invalidate {
            entity_type,
            key_values,
        } => {
            let cache = build_cache(&config, store)?;
            let signal = interrupt_signal();
            signal
                .guard(
                    "probe invalidation",
                    cache.invalidate_document(entity_type.as_str(), &key_values),
                )
                .await?;
            info!(entity_type = %entity_type, key = %key_values, "entity cache entry invalidated");
        }
    }

    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_cache(config: &ProbeConfig, store: Arc<PostgresEntityStore>) -> AppResult<EntityCache> {
    let reader = Arc::new(UnitOfWorkFactory::<()>::builder(store).build()?);

    let distributed: Arc<dyn DistributedCache> = match config.redis_url.as_deref() {
        Some(redis_url) => {
            let client = redis::Client::open(redis_url).map_err(|error| {
                AppError::Validation(format!("invalid REDIS_URL: {error}"))
            })?;
            Arc::new(RedisDistributedCache::new(client, ""))
        }
        None => {
            warn!("REDIS_URL is not set, caching in process memory");
            Arc::new(InMemoryDistributedCache::new())
        }
    };

    Ok(EntityCache::with_distributed_cache(
        config.cache_options.clone(),
        distributed,
        reader,
    ))
}

fn interrupt_signal() -> CancellationSignal {
    let (trigger, signal) = cancellation_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    signal
}
