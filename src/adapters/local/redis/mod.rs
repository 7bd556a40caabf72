//! Redis adapter for multi-instance deployment.
//!
//! Provides the distributed `CacheBackend`; atomic batches run as a single
//! `MULTI`/`EXEC` round trip, so they stay atomic across service instances.

mod cache;
mod error;
mod pool;

pub use pool::RedisPool;

pub type RedisCache = RedisPool;
