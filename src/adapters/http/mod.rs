//! Inbound HTTP adapter.
//!
//! Every route except `/health` runs behind the admission middleware, which
//! buffers the body so the signature covers exactly the bytes the handler
//! later parses. Preflights are answered by CORS after the rate limit.

mod admission;
mod clips;
mod health;
mod tasks;

use crate::application::authenticator::{
    RequestAuthenticator, IDEMPOTENCY_HEADER, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::application::catalog::ClipCatalog;
use crate::application::gate::AdmissionGate;
use crate::application::limiter::SlidingWindowLimiter;
use crate::application::pipeline::IngestionPipeline;
use crate::application::task_registry::TaskRegistry;
use crate::config::{AllowedOrigin, ServiceConfig};
use crate::ports::cache::CacheBackend;
use crate::ports::storage::ObjectStore;
use crate::ports::toolchain::MediaToolchain;
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub type Pipeline = IngestionPipeline<dyn ObjectStore, dyn MediaToolchain>;

/// Everything a handler may touch, built once by the entry point.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub pipeline: Arc<Pipeline>,
    pub catalog: Arc<ClipCatalog<dyn ObjectStore>>,
    pub registry: Arc<TaskRegistry>,
    pub cache: Arc<dyn CacheBackend>,
    pub store: Arc<dyn ObjectStore>,
    pub max_body_bytes: usize,
    pub allowed_origin: AllowedOrigin,
}

impl AppState {
    pub fn new(
        config: &ServiceConfig,
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn ObjectStore>,
        toolchain: Arc<dyn MediaToolchain>,
    ) -> Self {
        let limiter = SlidingWindowLimiter::new(cache.clone(), config.rate_limit);
        let authenticator =
            RequestAuthenticator::new(config.hmac_secret.clone(), config.freshness_window);
        Self {
            gate: Arc::new(AdmissionGate::new(limiter, authenticator)),
            pipeline: Arc::new(IngestionPipeline::new(
                store.clone(),
                toolchain,
                config.pipeline.clone(),
            )),
            catalog: Arc::new(ClipCatalog::new(store.clone())),
            registry: Arc::new(TaskRegistry::new()),
            cache,
            store,
            max_body_bytes: config.max_body_bytes,
            allowed_origin: config.allowed_origin.clone(),
        }
    }
}

fn cors(allowed: AllowedOrigin) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin.to_str().map_or(false, |o| allowed.matches(o))
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderName::from_static(TIMESTAMP_HEADER),
            HeaderName::from_static(NONCE_HEADER),
            HeaderName::from_static(IDEMPOTENCY_HEADER),
        ])
        .max_age(Duration::from_secs(86_400))
}

pub fn router(state: AppState) -> Router {
    let admitted = Router::new()
        .route("/process-clips", post(clips::process_clips))
        .route("/clip-status/:clip_id", get(clips::clip_status))
        .route("/list-processed-clips", get(clips::list_processed_clips))
        .route("/cleanup/:clip_id", delete(clips::cleanup_clip))
        .route("/task/:task_id", get(tasks::get_task).delete(tasks::delete_task))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/cleanup", post(tasks::cleanup_tasks))
        .route("/tasks/stats", get(tasks::task_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), admission::admit));

    Router::new()
        .route("/health", get(health::health))
        .merge(admitted)
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(cors(state.allowed_origin.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), admission::limit_preflight))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
