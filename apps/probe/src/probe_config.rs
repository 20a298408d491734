use std::env;
use std::time::Duration;

use keeper_application::{CacheEntryExpiration, EntityCacheOptions, ModelBuilder, SchemaModel};
use keeper_core::{AppError, AppResult};
use keeper_domain::{KeyValue, KeyValues};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_CAPABILITIES: &str = "cud";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    Migrate,
    Get {
        entity_type: String,
        key_values: KeyValues,
    },
    Invalidate {
        entity_type: String,
        key_values: KeyValues,
    },
}

impl ProbeCommand {
    pub fn parse(arguments: &[String]) -> AppResult<Self> {
        let Some((command, rest)) = arguments.split_first() else {
            return Err(AppError::Validation(
                "usage: keeper-probe <migrate | get <type> <key>... | invalidate <type> <key>...>"
                    .to_owned(),
            ));
        };

        match command.as_str() {
            "migrate" => Ok(Self::Migrate),
            "get" => {
                let (entity_type, key_values) = parse_target(rest)?;
                Ok(Self::Get {
                    entity_type,
                    key_values,
                })
            }
            "invalidate" => {
                let (entity_type, key_values) = parse_target(rest)?;
                Ok(Self::Invalidate {
                    entity_type,
                    key_values,
                })
            }
            other => Err(AppError::Validation(format!(
                "unknown command '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub command: ProbeCommand,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub cache_options: EntityCacheOptions,
    pub schema: SchemaModel,
}

impl ProbeConfig {
    pub fn load() -> AppResult<Self> {
        let arguments: Vec<String> = env::args().skip(1).collect();
        let command = ProbeCommand::parse(&arguments)?;

        let database_url = required_env("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let default_expiration = CacheEntryExpiration::default();
        let entry_expiration = CacheEntryExpiration {
            absolute: parse_env_seconds(
                "ENTITY_CACHE_ABSOLUTE_EXPIRATION_SECONDS",
                default_expiration.absolute,
            )?,
            sliding: parse_env_seconds(
                "ENTITY_CACHE_SLIDING_EXPIRATION_SECONDS",
                default_expiration.sliding,
            )?,
        };
        let lock_timeout = match env::var("ENTITY_CACHE_LOCK_TIMEOUT_MS") {
            Ok(value) => Some(Duration::from_millis(value.parse::<u64>().map_err(
                |error| {
                    AppError::Validation(format!(
                        "invalid ENTITY_CACHE_LOCK_TIMEOUT_MS value '{value}': {error}"
                    ))
                },
            )?)),
            Err(_) => None,
        };

        let cache_options = EntityCacheOptions::new(required_env("ENTITY_CACHE_KEY_PREFIX")?)?
            .with_entry_expiration(entry_expiration)
            .with_lock_timeout(lock_timeout);
        let schema = parse_entity_types(required_env("ENTITY_TYPES")?.as_str())?;

        Ok(Self {
            command,
            database_url,
            redis_url,
            cache_options,
            schema,
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Parses `table[:flags]` entries; flags are `c`reated, `u`pdated, soft `d`eleted, `t`enant.
fn parse_entity_types(value: &str) -> AppResult<SchemaModel> {
    let mut model = ModelBuilder::new();
    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (table, flags) = entry.split_once(':').unwrap_or((entry, DEFAULT_CAPABILITIES));
        let entity = model.entity(table);
        for flag in flags.chars() {
            match flag {
                'c' => entity.creation_recordable(),
                'u' => entity.updation_recordable(),
                'd' => entity.soft_deletion_recordable(),
                't' => entity.multi_tenant(),
                other => {
                    return Err(AppError::Validation(format!(
                        "unknown capability flag '{other}' for entity type '{table}'"
                    )));
                }
            };
        }
    }

    let schema = model.build()?;
    if schema.is_empty() {
        return Err(AppError::Validation(
            "ENTITY_TYPES must name at least one entity type".to_owned(),
        ));
    }

    Ok(schema)
}

fn parse_target(arguments: &[String]) -> AppResult<(String, KeyValues)> {
    let Some((entity_type, keys)) = arguments.split_first() else {
        return Err(AppError::Validation("entity type is required".to_owned()));
    };

    let key_values = KeyValues::new(keys.iter().map(|key| parse_key_value(key)).collect())?;
    Ok((entity_type.clone(), key_values))
}

fn parse_key_value(value: &str) -> KeyValue {
    if let Ok(number) = value.parse::<i64>() {
        return KeyValue::Int(number);
    }
    if let Ok(uuid) = Uuid::parse_str(value) {
        return KeyValue::Uuid(uuid);
    }

    KeyValue::Text(value.to_owned())
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_seconds(name: &str, default: Option<Duration>) -> AppResult<Option<Duration>> {
    match env::var(name) {
        Ok(value) if value.trim() == "0" => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(|seconds| Some(Duration::from_secs(seconds)))
            .map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
        Err(_) => Ok(default),
    }
}
