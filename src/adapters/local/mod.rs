//! Adapters that run inside a single process or talk to local services.

pub mod fs;
pub mod memory_cache;
#[cfg(feature = "redis")]
pub mod redis;

pub use fs::FsObjectStore;
pub use memory_cache::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
