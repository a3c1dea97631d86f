//! Document store implementations

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::DocumentStore;

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;
