//! Server Binary - Clip ingestion service
//!
//! This is the process entry point. It owns the lifecycle of every shared
//! object and wires up:
//! - Cache (Redis, or in-memory in development)
//! - Object store (filesystem or S3-compatible)
//! - Media toolchain (yt-dlp, ffprobe, ffmpeg)
//! - HTTP inbound adapter with admission control

use clipaudio::adapters::media::{FfmpegToolchain, ToolTimeouts};
use clipaudio::adapters::{build_cache, build_store};
use clipaudio::config::ServiceConfig;
use clipaudio::ports::toolchain::MediaToolchain;
use clipaudio::{router, AppState};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,clipaudio=debug,tower_http=info";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").map_or(false, |v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing();
    info!(
        env = ?config.app_env,
        storage = ?config.storage_backend,
        hmac_secret_set = config.hmac_secret.is_some(),
        rate_limit = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window.as_secs(),
        "starting clipaudio"
    );
    if config.hmac_secret.is_none() {
        warn!("HMAC_SHARED_SECRET is not set; every admission-checked request will be rejected");
    }

    // 1. Adapters
    let cache = match build_cache(&config).await {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "cache unavailable");
            std::process::exit(1);
        }
    };

    let store = match build_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "object store unavailable");
            std::process::exit(1);
        }
    };

    let toolchain: Arc<dyn MediaToolchain> = Arc::new(FfmpegToolchain::new(
        config.clip_source_url.clone(),
        ToolTimeouts {
            fetch: config.fetch_timeout,
            transcode: config.transcode_timeout,
            probe: config.probe_timeout,
        },
    ));
    if !toolchain.is_available().await {
        warn!("media toolchain incomplete; clip processing will fail until yt-dlp, ffprobe and ffmpeg are installed");
    }

    // 2. Application state and HTTP layer
    let state = AppState::new(&config, cache, store, toolchain);
    let app = router(state);

    // 3. Start Server
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .expect("Failed to bind TCP listener");
    info!(address = %config.bind_address(), "listening");
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
