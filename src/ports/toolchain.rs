use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::ClipId;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: &'static str, secs: u64 },
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("expected output missing: {0}")]
    OutputMissing(PathBuf),
    #[error("toolchain io error: {0}")]
    Io(#[from] std::io::Error),
}

/// External media tools: a clip fetcher plus a probe/transcode toolkit.
///
/// Every call carries its own timeout; a timeout surfaces as
/// [`ToolchainError::Timeout`] and is never retried here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolchain: Send + Sync {
    /// Fetch the clip's source video into `dest_dir`, returning an mp4 path.
    async fn fetch_clip(&self, clip_id: &ClipId, dest_dir: &Path)
        -> Result<PathBuf, ToolchainError>;

    /// Container duration in seconds, `None` when the probe has no answer.
    async fn probe_duration(&self, media: &Path) -> Result<Option<f64>, ToolchainError>;

    /// Transcode the audio track of `src` into PCM WAV at `dst`.
    async fn extract_audio(
        &self,
        src: &Path,
        dst: &Path,
        sample_rate: u32,
        channels: u8,
    ) -> Result<(), ToolchainError>;

    /// Split `src` into `count` segments of `chunk_secs` each inside `out_dir`,
    /// returned in index order. Paths may point at files that were never
    /// written; callers validate.
    async fn split_audio(
        &self,
        src: &Path,
        out_dir: &Path,
        chunk_secs: u32,
        count: usize,
    ) -> Result<Vec<PathBuf>, ToolchainError>;

    async fn is_available(&self) -> bool;
}
