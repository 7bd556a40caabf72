use super::AppState;
use crate::domain::clip::VIDEO_PREFIX;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ffmpeg_available: bool,
    pub store_configured: bool,
    pub cache_healthy: bool,
    pub cache_type: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (ffmpeg_available, store, cache_healthy) = tokio::join!(
        state.pipeline.toolchain().is_available(),
        state.store.list(VIDEO_PREFIX, 1, None),
        state.cache.health_check(),
    );
    let store_configured = match store {
        Ok(_) => true,
        Err(e) => {
            warn!(store = %state.store.describe(), error = %e, "object store probe failed");
            false
        }
    };
    let healthy = ffmpeg_available && store_configured && cache_healthy;

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        ffmpeg_available,
        store_configured,
        cache_healthy,
        cache_type: state.cache.kind(),
    })
}
