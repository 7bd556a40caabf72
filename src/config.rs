//! Configuration loaded from the environment.

use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_ENV must be `development` or `production`, got `{0}`")]
    InvalidAppEnv(String),
    #[error("STORAGE_BACKEND must be `fs` or `s3`, got `{0}`")]
    InvalidStorageBackend(String),
    #[error("S3_BUCKET is required when STORAGE_BACKEND=s3")]
    MissingBucket,
    #[error("backend `{0}` is not compiled into this build")]
    BackendNotCompiled(&'static str),
    #[error("REDIS_URL is required in production")]
    RedisRequired,
    #[error("redis is unavailable: {0}")]
    RedisUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Fs,
    S3,
}

/// A secret value that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Browser origins allowed by CORS. `*.suffix` admits any subdomain of
/// `suffix`; anything else must match the `Origin` header exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigin {
    Subdomains(String),
    Exact(String),
}

impl AllowedOrigin {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_end_matches('/');
        match raw.strip_prefix("*.") {
            Some(suffix) => AllowedOrigin::Subdomains(format!(".{}", suffix)),
            None => AllowedOrigin::Exact(raw.to_string()),
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            AllowedOrigin::Subdomains(suffix) => {
                let host = origin
                    .strip_prefix("https://")
                    .or_else(|| origin.strip_prefix("http://"))
                    .unwrap_or(origin);
                host.len() > suffix.len() && host.ends_with(suffix.as_str())
            }
            AllowedOrigin::Exact(expected) => origin == expected,
        }
    }
}

impl Default for AllowedOrigin {
    fn default() -> Self {
        AllowedOrigin::parse("*.workers.dev")
    }
}

/// Sliding-window admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 15,
            window: Duration::from_secs(60),
        }
    }
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Longest audio uploaded without chunking, in seconds.
    pub max_clip_duration: u32,
    /// Length of each chunk, in seconds.
    pub chunk_duration: u32,
    pub sample_rate: u32,
    pub channels: u8,
    /// Written into upload metadata as `source`.
    pub source_tag: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_clip_duration: 300,
            chunk_duration: 90,
            sample_rate: 16_000,
            channels: 1,
            source_tag: "twitch".to_string(),
        }
    }
}

/// Configuration for the ingestion service.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    pub app_env: AppEnv,
    /// Shared secret for request signatures. `None` rejects every signed call.
    pub hmac_secret: Option<Secret>,
    pub rate_limit: RateLimitConfig,
    pub freshness_window: Duration,
    pub redis_url: Option<String>,
    pub storage_backend: StorageBackend,
    pub storage_root: String,
    pub s3_bucket: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_region: String,
    pub pipeline: PipelineConfig,
    pub clip_source_url: String,
    pub fetch_timeout: Duration,
    pub transcode_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_body_bytes: usize,
    pub allowed_origin: AllowedOrigin,
}

/// Parses `name`, falling back to `default` with a warning when the value is
/// unparsable or outside `bounds`.
fn bounded<T, F>(lookup: &F, name: &str, default: T, bounds: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if bounds.contains(&value) => value,
        Ok(value) => {
            warn!(
                "{} = {} is outside {}..={}, using default {}",
                name,
                value,
                bounds.start(),
                bounds.end(),
                default
            );
            default
        }
        Err(_) => {
            warn!("{} = {:?} is not a valid number, using default {}", name, raw, default);
            default
        }
    }
}

fn non_empty<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

impl ServiceConfig {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_env = match lookup("APP_ENV").as_deref().map(str::trim) {
            None | Some("") | Some("development") => AppEnv::Development,
            Some("production") => AppEnv::Production,
            Some(other) => return Err(ConfigError::InvalidAppEnv(other.to_string())),
        };

        let storage_backend = match lookup("STORAGE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("fs") => StorageBackend::Fs,
            Some("s3") => StorageBackend::S3,
            Some(other) => return Err(ConfigError::InvalidStorageBackend(other.to_string())),
        };
        let s3_bucket = non_empty(&lookup, "S3_BUCKET");
        if storage_backend == StorageBackend::S3 && s3_bucket.is_none() {
            return Err(ConfigError::MissingBucket);
        }

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_clip_duration: bounded(&lookup, "MAX_CLIP_DURATION", defaults.max_clip_duration, 1..=3600),
            chunk_duration: bounded(&lookup, "CHUNK_DURATION", defaults.chunk_duration, 1..=3600),
            sample_rate: bounded(&lookup, "AUDIO_SAMPLE_RATE", defaults.sample_rate, 8_000..=48_000),
            channels: bounded(&lookup, "AUDIO_CHANNELS", defaults.channels, 1..=2),
            source_tag: non_empty(&lookup, "CLIP_SOURCE_TAG").unwrap_or(defaults.source_tag),
        };

        let limits = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: bounded(&lookup, "RATE_LIMIT_REQUESTS", limits.max_requests, 1..=10_000),
            window: Duration::from_secs(bounded(
                &lookup,
                "RATE_LIMIT_WINDOW_SECS",
                limits.window.as_secs(),
                1..=3600,
            )),
        };

        Ok(Self {
            addr: lookup("ADDR").unwrap_or_else(|| String::from("0.0.0.0")),
            port: lookup("PORT").unwrap_or_else(|| String::from("8000")),
            app_env,
            hmac_secret: non_empty(&lookup, "HMAC_SHARED_SECRET").map(Secret::new),
            rate_limit,
            freshness_window: Duration::from_secs(bounded(&lookup, "REQUEST_FRESHNESS_SECS", 300, 1..=3600)),
            redis_url: non_empty(&lookup, "REDIS_URL"),
            storage_backend,
            storage_root: lookup("STORAGE_ROOT").unwrap_or_else(|| String::from("./storage")),
            s3_bucket,
            s3_endpoint_url: non_empty(&lookup, "S3_ENDPOINT_URL"),
            s3_region: non_empty(&lookup, "S3_REGION").unwrap_or_else(|| String::from("auto")),
            pipeline,
            clip_source_url: non_empty(&lookup, "CLIP_SOURCE_URL")
                .unwrap_or_else(|| String::from("https://clips.twitch.tv")),
            fetch_timeout: Duration::from_secs(bounded(&lookup, "FETCH_TIMEOUT_SECS", 120, 1..=3600)),
            transcode_timeout: Duration::from_secs(bounded(&lookup, "TRANSCODE_TIMEOUT_SECS", 300, 1..=3600)),
            probe_timeout: Duration::from_secs(bounded(&lookup, "PROBE_TIMEOUT_SECS", 30, 1..=600)),
            max_body_bytes: bounded(&lookup, "MAX_BODY_BYTES", 1024 * 1024, 1024..=100 * 1024 * 1024),
            allowed_origin: non_empty(&lookup, "WORKERS_ORIGIN")
                .map(|raw| AllowedOrigin::parse(&raw))
                .unwrap_or_default(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(move |name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_address(), "0.0.0.0:8000");
        assert_eq!(cfg.app_env, AppEnv::Development);
        assert_eq!(cfg.rate_limit, RateLimitConfig::default());
        assert_eq!(cfg.freshness_window, Duration::from_secs(300));
        assert_eq!(cfg.pipeline, PipelineConfig::default());
        assert_eq!(cfg.storage_backend, StorageBackend::Fs);
        assert!(cfg.hmac_secret.is_none());
        assert_eq!(cfg.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn out_of_range_falls_back_to_default() {
        let cfg = config(&[
            ("RATE_LIMIT_REQUESTS", "0"),
            ("RATE_LIMIT_WINDOW_SECS", "abc"),
            ("AUDIO_CHANNELS", "6"),
            ("CHUNK_DURATION", "120"),
        ])
        .unwrap();
        assert_eq!(cfg.rate_limit.max_requests, 15);
        assert_eq!(cfg.rate_limit.window, Duration::from_secs(60));
        assert_eq!(cfg.pipeline.channels, 1);
        assert_eq!(cfg.pipeline.chunk_duration, 120);
    }

    #[test]
    fn s3_requires_bucket() {
        assert!(matches!(
            config(&[("STORAGE_BACKEND", "s3")]),
            Err(ConfigError::MissingBucket)
        ));
        let cfg = config(&[("STORAGE_BACKEND", "s3"), ("S3_BUCKET", "clips")]).unwrap();
        assert_eq!(cfg.s3_bucket.as_deref(), Some("clips"));
        assert_eq!(cfg.s3_region, "auto");
    }

    #[test]
    fn rejects_unknown_environment() {
        assert!(matches!(
            config(&[("APP_ENV", "staging")]),
            Err(ConfigError::InvalidAppEnv(_))
        ));
    }

    #[test]
    fn blank_secret_counts_as_unset() {
        let cfg = config(&[("HMAC_SHARED_SECRET", "  ")]).unwrap();
        assert!(cfg.hmac_secret.is_none());
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let cfg = config(&[("HMAC_SHARED_SECRET", "hunter2")]).unwrap();
        assert_eq!(cfg.hmac_secret.as_ref().map(Secret::expose), Some("hunter2"));
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }

    #[test]
    fn workers_subdomains_are_the_default_origin() {
        let origin = config(&[]).unwrap().allowed_origin;
        assert!(origin.matches("https://clips-api.workers.dev"));
        assert!(!origin.matches("https://workers.dev"));
        assert!(!origin.matches("https://evil.example.com"));
        assert!(!origin.matches("https://workers.dev.evil.example.com"));
    }

    #[test]
    fn explicit_origin_must_match_exactly() {
        let origin = config(&[("WORKERS_ORIGIN", "https://ingest.example.com/")])
            .unwrap()
            .allowed_origin;
        assert_eq!(origin, AllowedOrigin::Exact("https://ingest.example.com".into()));
        assert!(origin.matches("https://ingest.example.com"));
        assert!(!origin.matches("https://other.example.com"));
    }
}
