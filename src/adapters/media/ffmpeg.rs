//! MediaToolchain backed by the `yt-dlp`, `ffprobe` and `ffmpeg` binaries.

use crate::domain::ClipId;
use crate::ports::toolchain::{MediaToolchain, ToolchainError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const FETCHED_EXTENSIONS: [&str; 3] = ["mp4", "mkv", "webm"];

#[derive(Debug, Clone)]
pub struct ToolTimeouts {
    pub fetch: Duration,
    pub transcode: Duration,
    pub probe: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(120),
            transcode: Duration::from_secs(300),
            probe: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    source_base_url: String,
    timeouts: ToolTimeouts,
}

impl FfmpegToolchain {
    pub fn new(source_base_url: impl Into<String>, timeouts: ToolTimeouts) -> Self {
        Self {
            source_base_url: source_base_url.into().trim_end_matches('/').to_string(),
            timeouts,
        }
    }

    fn clip_url(&self, clip_id: &ClipId) -> String {
        format!("{}/{}", self.source_base_url, clip_id)
    }
}

/// Runs `command` to completion under `limit`. The child is killed if the
/// deadline passes.
async fn run(tool: &'static str, mut command: Command, limit: Duration) -> Result<Output, ToolchainError> {
    command.kill_on_drop(true).stdin(std::process::Stdio::null());
    let output = match timeout(limit, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(ToolchainError::Spawn { tool, source }),
        Err(_) => {
            return Err(ToolchainError::Timeout {
                tool,
                secs: limit.as_secs(),
            })
        }
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolchainError::Failed {
            tool,
            status: output.status.to_string(),
            stderr: stderr.chars().take(500).collect(),
        });
    }
    Ok(output)
}

async fn non_empty(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

fn transcode_to_wav(src: &Path, dst: &Path, sample_rate: u32, channels: u8) -> Command {
    let mut command = Command::new("ffmpeg");
    command
        .arg("-nostdin")
        .arg("-y")
        .arg("-i")
        .arg(src)
        .arg("-vn")
        .arg("-ac")
        .arg(channels.to_string())
        .arg("-ar")
        .arg(sample_rate.to_string())
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg(dst);
    command
}

#[async_trait]
impl MediaToolchain for FfmpegToolchain {
    async fn fetch_clip(&self, clip_id: &ClipId, dest_dir: &Path) -> Result<PathBuf, ToolchainError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let template = dest_dir.join(format!("{}.%(ext)s", clip_id));
        let mut command = Command::new("yt-dlp");
        command
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("-f")
            .arg("mp4/best")
            .arg("-o")
            .arg(&template)
            .arg(self.clip_url(clip_id));
        run("yt-dlp", command, self.timeouts.fetch).await?;

        let mut fetched = None;
        for ext in FETCHED_EXTENSIONS {
            let candidate = dest_dir.join(format!("{}.{}", clip_id, ext));
            if non_empty(&candidate).await {
                fetched = Some(candidate);
                break;
            }
        }
        let fetched = fetched.ok_or_else(|| ToolchainError::OutputMissing(dest_dir.join(clip_id.as_str())))?;
        if fetched.extension().and_then(|e| e.to_str()) == Some("mp4") {
            return Ok(fetched);
        }

        debug!(clip_id = %clip_id, path = %fetched.display(), "remuxing fetched clip to mp4");
        let remuxed = dest_dir.join(format!("{}.remux.mp4", clip_id));
        let mut command = Command::new("ffmpeg");
        command
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(&fetched)
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("+faststart")
            .arg(&remuxed);
        run("ffmpeg", command, self.timeouts.transcode).await?;
        if !non_empty(&remuxed).await {
            return Err(ToolchainError::OutputMissing(remuxed));
        }
        Ok(remuxed)
    }

    async fn probe_duration(&self, media: &Path) -> Result<Option<f64>, ToolchainError> {
        let mut command = Command::new("ffprobe");
        command
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(media);
        let output = run("ffprobe", command, self.timeouts.probe).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim().parse::<f64>().ok().filter(|d| d.is_finite()))
    }

    async fn extract_audio(
        &self,
        src: &Path,
        dst: &Path,
        sample_rate: u32,
        channels: u8,
    ) -> Result<(), ToolchainError> {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        run(
            "ffmpeg",
            transcode_to_wav(src, dst, sample_rate, channels),
            self.timeouts.transcode,
        )
        .await?;
        if !non_empty(dst).await {
            return Err(ToolchainError::OutputMissing(dst.to_path_buf()));
        }
        Ok(())
    }

    async fn split_audio(
        &self,
        src: &Path,
        out_dir: &Path,
        chunk_secs: u32,
        count: usize,
    ) -> Result<Vec<PathBuf>, ToolchainError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            let output = out_dir.join(format!("{:03}.wav", index));
            let start = index as u64 * u64::from(chunk_secs);
            let mut command = Command::new("ffmpeg");
            command
                .arg("-nostdin")
                .arg("-y")
                .arg("-i")
                .arg(src)
                .arg("-ss")
                .arg(start.to_string())
                .arg("-t")
                .arg(chunk_secs.to_string())
                .arg("-acodec")
                .arg("pcm_s16le")
                .arg(&output);
            // One bad segment does not sink the rest; the caller drops
            // missing or empty files.
            if let Err(e) = run("ffmpeg", command, self.timeouts.transcode).await {
                warn!(index, error = %e, "failed to cut audio chunk");
            }
            chunks.push(output);
        }
        Ok(chunks)
    }

    async fn is_available(&self) -> bool {
        let mut available = true;
        for tool in ["ffmpeg", "ffprobe", "yt-dlp"] {
            let mut command = Command::new(tool);
            command.arg(if tool == "yt-dlp" { "--version" } else { "-version" });
            if let Err(e) = run(tool, command, self.timeouts.probe).await {
                warn!(tool, error = %e, "media tool unavailable");
                available = false;
            }
        }
        available
    }
}
