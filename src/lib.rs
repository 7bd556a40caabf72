//! clipaudio - Clip ingestion service
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (clip IDs, key layout, results, tasks)
//! - ports/: Trait definitions (object store, media toolchain, cache)
//! - adapters/: Concrete implementations (fs, S3, memory, Redis, ffmpeg, HTTP)
//! - application/: Services (admission gate, task registry, pipeline, catalog)
//! - config: Environment configuration
//!
//! # Features
//! - `redis`: Redis-backed cache so rate limits hold across instances
//! - `s3`: S3-compatible object storage (AWS S3, Cloudflare R2)

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use adapters::http::{router, AppState};
pub use config::ServiceConfig;
pub use error::ApiError;
