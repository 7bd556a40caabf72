//! Clip identifiers and the object-store key layout derived from them.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Longest clip ID accepted at the boundary.
pub const MAX_CLIP_ID_LEN: usize = 50;

/// Most clips accepted in one processing request.
pub const MAX_BATCH_SIZE: usize = 10;

fn clip_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").expect("static clip id pattern"))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipIdError {
    #[error("clip id is empty")]
    Empty,
    #[error("clip id is longer than {MAX_CLIP_ID_LEN} characters")]
    TooLong,
    #[error("clip id contains characters outside [A-Za-z0-9_-]")]
    InvalidCharacters,
}

/// A validated clip identifier.
///
/// Construction goes through [`ClipId::parse`], so any `ClipId` in hand is safe
/// to splice into a URL, a filesystem path or a storage key. Input is never
/// trimmed or otherwise corrected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(String);

impl ClipId {
    pub fn parse(raw: &str) -> Result<Self, ClipIdError> {
        if raw.is_empty() {
            return Err(ClipIdError::Empty);
        }
        if raw.chars().count() > MAX_CLIP_ID_LEN {
            return Err(ClipIdError::TooLong);
        }
        if !clip_id_pattern().is_match(raw) {
            return Err(ClipIdError::InvalidCharacters);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn video_key(&self) -> String {
        format!("{}/{}.mp4", VIDEO_PREFIX, self.0)
    }

    pub fn audio_key(&self) -> String {
        format!("{}/{}.wav", AUDIO_PREFIX, self.0)
    }

    /// Prefix under which every chunk of this clip lives (`audio/{id}/`).
    pub fn chunk_dir_prefix(&self) -> String {
        format!("{}/{}/", AUDIO_PREFIX, self.0)
    }

    /// Prefix matching chunk objects only (`audio/{id}/chunk_`).
    pub fn chunk_prefix(&self) -> String {
        format!("{}chunk_", self.chunk_dir_prefix())
    }

    pub fn chunk_key(&self, index: usize) -> String {
        format!("{}{:03}.wav", self.chunk_prefix(), index)
    }

    pub fn transcript_key(&self, kind: TranscriptKind) -> String {
        format!("{}/{}.{}", TRANSCRIPT_PREFIX, self.0, kind.extension())
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ClipId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

pub const VIDEO_PREFIX: &str = "clips";
pub const AUDIO_PREFIX: &str = "audio";
pub const TRANSCRIPT_PREFIX: &str = "transcripts";

/// Transcript artifacts written by the downstream speech stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Json,
    Text,
    Vtt,
    Ok,
}

impl TranscriptKind {
    pub const ALL: [TranscriptKind; 4] = [
        TranscriptKind::Json,
        TranscriptKind::Text,
        TranscriptKind::Vtt,
        TranscriptKind::Ok,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            TranscriptKind::Json => "json",
            TranscriptKind::Text => "txt",
            TranscriptKind::Vtt => "vtt",
            TranscriptKind::Ok => "ok",
        }
    }
}

/// Parses the chunk index out of a key such as `audio/abc/chunk_004.wav`.
pub fn chunk_index_from_key(key: &str) -> Option<usize> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^chunk_(\d+)\.wav$").expect("static chunk pattern"));
    let file_name = key.rsplit('/').next()?;
    pattern
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extracts `{id}` from a top-level processed audio key (`audio/{id}.wav`).
/// Chunk keys and anything nested are ignored.
pub fn clip_id_from_audio_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("audio/")?;
    if rest.contains('/') {
        return None;
    }
    rest.strip_suffix(".wav").filter(|id| !id.is_empty())
}

/// Validates a whole batch, reporting every offending entry at once.
pub fn parse_clip_ids(raw: &[String]) -> Result<Vec<ClipId>, Vec<String>> {
    let mut ids = Vec::with_capacity(raw.len());
    let mut invalid = Vec::new();
    for candidate in raw {
        match ClipId::parse(candidate) {
            Ok(id) => ids.push(id),
            Err(e) => invalid.push(format!("{} ({})", candidate, e)),
        }
    }
    if invalid.is_empty() {
        Ok(ids)
    } else {
        Err(invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("clip_ids must not be empty")]
    Empty,
    #[error("at most {MAX_BATCH_SIZE} clips per request, got {0}")]
    TooLarge(usize),
    #[error("invalid clip ids: {}", .0.join(", "))]
    InvalidIds(Vec<String>),
}

/// A non-empty, size-capped list of validated clip IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipBatch(Vec<ClipId>);

impl ClipBatch {
    /// The size cap is checked before any ID is looked at.
    pub fn parse(raw: &[String]) -> Result<Self, BatchError> {
        if raw.is_empty() {
            return Err(BatchError::Empty);
        }
        if raw.len() > MAX_BATCH_SIZE {
            return Err(BatchError::TooLarge(raw.len()));
        }
        parse_clip_ids(raw).map(Self).map_err(BatchError::InvalidIds)
    }

    pub fn ids(&self) -> &[ClipId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ClipId::to_string).collect()
    }
}
