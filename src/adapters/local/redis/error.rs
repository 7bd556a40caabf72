//! Redis error conversions for the cache adapter.

use crate::ports::cache::CacheError;
use deadpool_redis::CreatePoolError;

pub type RedisError = deadpool_redis::redis::RedisError;
pub type PoolError = deadpool_redis::PoolError;

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
            CacheError::Unavailable(format!("Redis error: {}", err))
        } else {
            CacheError::Command(format!("Redis error: {}", err))
        }
    }
}

impl From<PoolError> for CacheError {
    fn from(err: PoolError) -> Self {
        CacheError::Unavailable(format!("Pool error: {}", err))
    }
}

impl From<CreatePoolError> for CacheError {
    fn from(err: CreatePoolError) -> Self {
        CacheError::Unavailable(format!("Create pool error: {}", err))
    }
}
