//! Media tool adapters.

pub mod ffmpeg;

pub use ffmpeg::{FfmpegToolchain, ToolTimeouts};
