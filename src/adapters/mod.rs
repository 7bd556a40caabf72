//! Adapters - Concrete implementations of ports.
//!
//! The factories here pick an implementation from configuration; the entry
//! point owns whatever they return.

#[cfg(feature = "s3")]
pub mod aws;
pub mod http;
pub mod local;
pub mod media;

use crate::config::{AppEnv, ConfigError, ServiceConfig, StorageBackend};
use crate::ports::cache::CacheBackend;
use crate::ports::storage::ObjectStore;
use local::fs::FsObjectStore;
use local::memory_cache::MemoryCache;
use std::sync::Arc;
use tracing::{info, warn};

/// Redis when configured and reachable. Production refuses to start
/// without it; development falls back to the in-memory cache.
pub async fn build_cache(config: &ServiceConfig) -> Result<Arc<dyn CacheBackend>, ConfigError> {
    let failure = match config.redis_url.as_deref() {
        Some(url) => match connect_redis(url).await {
            Ok(cache) => return Ok(cache),
            Err(e) => e,
        },
        None => ConfigError::RedisRequired,
    };
    if config.app_env == AppEnv::Production {
        return Err(failure);
    }
    warn!(reason = %failure, "falling back to in-memory cache");
    Ok(Arc::new(MemoryCache::new()))
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<Arc<dyn CacheBackend>, ConfigError> {
    let cache = local::redis::RedisCache::new(url)
        .map_err(|e| ConfigError::RedisUnavailable(e.to_string()))?;
    if !cache.health_check().await {
        return Err(ConfigError::RedisUnavailable("PING failed".to_string()));
    }
    info!("connected to redis cache");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> Result<Arc<dyn CacheBackend>, ConfigError> {
    Err(ConfigError::BackendNotCompiled("redis"))
}

pub async fn build_store(config: &ServiceConfig) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    let store: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackend::Fs => Arc::new(FsObjectStore::new(&config.storage_root)),
        StorageBackend::S3 => connect_s3(config).await?,
    };
    info!(store = %store.describe(), "object store ready");
    Ok(store)
}

#[cfg(feature = "s3")]
async fn connect_s3(config: &ServiceConfig) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    let bucket = config.s3_bucket.clone().ok_or(ConfigError::MissingBucket)?;
    let store = aws::s3::S3ObjectStore::connect(
        bucket,
        config.s3_endpoint_url.clone(),
        config.s3_region.clone(),
    )
    .await;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
async fn connect_s3(_config: &ServiceConfig) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    Err(ConfigError::BackendNotCompiled("s3"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> ServiceConfig {
        let vars: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(move |name| {
            vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn development_without_redis_uses_memory() {
        let cache = build_cache(&config(&[])).await.unwrap();
        assert_eq!(cache.kind(), "memory");
    }

    #[tokio::test]
    async fn production_without_redis_refuses_to_start() {
        let result = build_cache(&config(&[("APP_ENV", "production")])).await;
        assert!(matches!(result, Err(ConfigError::RedisRequired)));
    }

    #[tokio::test]
    async fn filesystem_store_by_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let store = build_store(&config(&[("STORAGE_ROOT", root.as_str())])).await.unwrap();
        assert_eq!(store.describe(), format!("fs:{}", root));
    }
}
