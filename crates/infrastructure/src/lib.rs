//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_distributed_cache;
mod in_memory_entity_store;
mod postgres_entity_store;
mod redis_distributed_cache;


pub use in_memory_distributed_cache::InMemoryDistributedCache;
pub use in_memory_entity_store::InMemoryEntityStore;
pub use postgres_entity_store::PostgresEntityStore;
pub use redis_distributed_cache::RedisDistributedCache;
