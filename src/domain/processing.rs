//! Per-clip results, batch summaries and the chunking arithmetic.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::clip::{chunk_index_from_key, ClipId};

/// Pipeline stages that can fail. Stage names prefix the error text of a
/// failed clip so callers can attribute the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    CheckExisting,
    Download,
    ProbeDuration,
    ExtractAudio,
    UploadVideo,
    UploadAudio,
    BuildChunks,
    UploadChunks,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::CheckExisting => "check_existing",
            PipelineStage::Download => "download",
            PipelineStage::ProbeDuration => "probe_duration",
            PipelineStage::ExtractAudio => "extract_audio",
            PipelineStage::UploadVideo => "upload_video",
            PipelineStage::UploadAudio => "upload_audio",
            PipelineStage::BuildChunks => "build_chunks",
            PipelineStage::UploadChunks => "upload_chunks",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run for one clip. Built once, never mutated
/// after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipProcessingResult {
    pub clip_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial_success: bool,
    pub files_uploaded: Vec<String>,
    pub duration: Option<f64>,
    pub error: Option<String>,
    pub needs_chunking: bool,
}

impl ClipProcessingResult {
    pub fn new(clip_id: &ClipId) -> Self {
        Self {
            clip_id: clip_id.to_string(),
            success: false,
            partial_success: false,
            files_uploaded: Vec::new(),
            duration: None,
            error: None,
            needs_chunking: false,
        }
    }

    pub(crate) fn fail(mut self, stage: PipelineStage, message: impl fmt::Display) -> Self {
        self.success = false;
        self.error = Some(format!("{}: {}", stage, message));
        self
    }

    pub(crate) fn partial(mut self, stage: PipelineStage, message: impl fmt::Display) -> Self {
        self.partial_success = true;
        self.fail(stage, message)
    }

    pub(crate) fn succeed(mut self) -> Self {
        self.success = true;
        self.error = None;
        self
    }
}

/// Aggregate of a batch. `failed > 0` is the only batch-level failure signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ClipProcessingResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<ClipProcessingResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// What the object store already holds for a clip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingStatusSnapshot {
    pub video_exists: bool,
    pub audio_exists: bool,
    pub chunk_keys: Vec<String>,
}

impl ProcessingStatusSnapshot {
    /// Distinct chunk indices among the listed keys. Keys that do not parse
    /// as `chunk_NNN.wav` are ignored.
    fn chunk_indices(&self) -> BTreeSet<usize> {
        self.chunk_keys
            .iter()
            .filter_map(|key| chunk_index_from_key(key))
            .collect()
    }

    /// Chunk count implied by the highest 0-based chunk index present.
    pub fn expected_chunks(&self) -> usize {
        self.chunk_indices().last().map(|max| max + 1).unwrap_or(0)
    }

    pub fn chunking_performed(&self) -> bool {
        !self.chunk_indices().is_empty()
    }

    /// Complete means the canonical audio exists and a gap-free chunk set is
    /// present. Main files without chunks never count as complete, since
    /// whether chunking was needed is unknown until duration is re-probed.
    pub fn is_complete(&self) -> bool {
        let indices = self.chunk_indices();
        self.audio_exists && !indices.is_empty() && indices.len() == self.expected_chunks()
    }

    pub fn has_partial_files(&self) -> bool {
        !self.is_complete() && (self.video_exists || self.audio_exists || self.chunking_performed())
    }

    /// Keys to report when the clip short-circuits as already complete.
    pub fn existing_keys(&self, clip_id: &ClipId) -> Vec<String> {
        let mut keys = Vec::with_capacity(2 + self.chunk_keys.len());
        if self.video_exists {
            keys.push(clip_id.video_key());
        }
        if self.audio_exists {
            keys.push(clip_id.audio_key());
        }
        keys.extend(self.chunk_keys.iter().cloned());
        keys
    }
}

/// `ceil(total / chunk_len)`; zero for non-positive inputs.
pub fn chunk_count(total_duration: f64, chunk_len: u32) -> usize {
    if !(total_duration > 0.0) || chunk_len == 0 {
        return 0;
    }
    (total_duration / f64::from(chunk_len)).ceil() as usize
}

/// Probed durations that are missing or non-positive mean "no chunking".
pub fn needs_chunking(duration: Option<f64>, max_clip_duration: u32) -> bool {
    matches!(duration, Some(d) if d > f64::from(max_clip_duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ClipId {
        ClipId::parse("abc123").unwrap()
    }

    #[test]
    fn four_hundred_seconds_makes_five_chunks() {
        assert_eq!(chunk_count(400.0, 90), 5);
        let keys: Vec<String> = (0..5).map(|i| id().chunk_key(i)).collect();
        assert_eq!(keys.first().unwrap(), "audio/abc123/chunk_000.wav");
        assert_eq!(keys.last().unwrap(), "audio/abc123/chunk_004.wav");
    }

    #[test]
    fn chunk_count_edges() {
        assert_eq!(chunk_count(90.0, 90), 1);
        assert_eq!(chunk_count(90.5, 90), 2);
        assert_eq!(chunk_count(0.0, 90), 0);
        assert_eq!(chunk_count(-3.0, 90), 0);
        assert_eq!(chunk_count(f64::NAN, 90), 0);
    }

    #[test]
    fn chunking_threshold() {
        assert!(!needs_chunking(None, 300));
        assert!(!needs_chunking(Some(300.0), 300));
        assert!(needs_chunking(Some(300.1), 300));
    }

    #[test]
    fn main_files_without_chunks_are_incomplete() {
        let snapshot = ProcessingStatusSnapshot {
            video_exists: true,
            audio_exists: true,
            chunk_keys: vec![],
        };
        assert!(!snapshot.is_complete());
        assert!(snapshot.has_partial_files());
    }

    #[test]
    fn gap_in_chunks_is_incomplete() {
        let snapshot = ProcessingStatusSnapshot {
            video_exists: true,
            audio_exists: true,
            chunk_keys: vec![id().chunk_key(0), id().chunk_key(2)],
        };
        assert_eq!(snapshot.expected_chunks(), 3);
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn stray_chunk_keys_cannot_fill_a_gap() {
        let snapshot = ProcessingStatusSnapshot {
            video_exists: true,
            audio_exists: true,
            chunk_keys: vec![
                id().chunk_key(0),
                id().chunk_key(2),
                "audio/abc123/chunk_tmp.wav".to_string(),
            ],
        };
        assert_eq!(snapshot.expected_chunks(), 3);
        assert!(!snapshot.is_complete());
        assert!(snapshot.has_partial_files());
    }

    #[test]
    fn stage_names_prefix_errors() {
        let failed = ClipProcessingResult::new(&id()).fail(PipelineStage::Download, "404");
        assert_eq!(failed.error.as_deref(), Some("download: 404"));
        assert_eq!(PipelineStage::CheckExisting.to_string(), "check_existing");
        assert_eq!(PipelineStage::ProbeDuration.to_string(), "probe_duration");
    }

    #[test]
    fn full_chunk_set_is_complete() {
        let snapshot = ProcessingStatusSnapshot {
            video_exists: true,
            audio_exists: true,
            chunk_keys: (0..3).map(|i| id().chunk_key(i)).collect(),
        };
        assert!(snapshot.is_complete());
        assert!(!snapshot.has_partial_files());
        assert_eq!(snapshot.existing_keys(&id()).len(), 5);
    }

    #[test]
    fn chunks_without_audio_are_incomplete() {
        let snapshot = ProcessingStatusSnapshot {
            video_exists: true,
            audio_exists: false,
            chunk_keys: vec![id().chunk_key(0)],
        };
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn summary_counts_partial_as_failed() {
        let ok = ClipProcessingResult::new(&id()).succeed();
        let partial = ClipProcessingResult::new(&id()).partial(PipelineStage::UploadAudio, "boom");
        let summary = BatchSummary::from_results(vec![ok, partial]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.results[1].error.as_deref(),
            Some("upload_audio: boom")
        );
    }
}
