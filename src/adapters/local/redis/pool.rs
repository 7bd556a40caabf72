//! Redis connection pool.

use crate::ports::cache::CacheError;
use deadpool_redis::{Config, Pool, Runtime};

/// Redis-backed adapter for the shared cache.
#[derive(Clone)]
pub struct RedisPool {
    pub(super) pool: Pool,
}

impl RedisPool {
    /// Create a new RedisPool with connection pool. No connection is made
    /// until the first command; call `health_check` to verify reachability.
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }
}
