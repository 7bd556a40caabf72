//! Object metadata attached to every upload.
//!
//! Object stores only accept short ASCII metadata. Entries are percent-encoded
//! when they contain anything else and dropped outright when the encoded form
//! would not fit, so a stored value is never a truncated escape sequence.

use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use tracing::warn;

use super::clip::ClipId;

pub const MAX_KEY_BYTES: usize = 128;
pub const MAX_VALUE_BYTES: usize = 256;

/// Longest duration reported as a number; anything past a day is `unknown`.
const MAX_REPORTED_DURATION: f64 = 86_400.0;

/// Characters left as-is when percent-encoding; everything else non-alphanumeric
/// is escaped.
const SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub type Metadata = BTreeMap<String, String>;

fn encode_part(raw: &str, limit: usize) -> Option<String> {
    let is_plain = raw.bytes().all(|b| b.is_ascii() && !b.is_ascii_control());
    let encoded = if is_plain {
        raw.to_string()
    } else {
        utf8_percent_encode(raw, SAFE).to_string()
    };
    (encoded.len() <= limit).then_some(encoded)
}

/// Applies the ASCII and length rules to every entry, dropping the ones that
/// cannot be represented.
pub fn sanitize(raw: impl IntoIterator<Item = (String, String)>) -> Metadata {
    let mut out = Metadata::new();
    for (key, value) in raw {
        let encoded_key = encode_part(&key, MAX_KEY_BYTES);
        let encoded_value = encode_part(&value, MAX_VALUE_BYTES);
        match (encoded_key, encoded_value) {
            (Some(k), Some(v)) => {
                out.insert(k, v);
            }
            _ => warn!(key = %key, "dropping metadata entry that does not fit"),
        }
    }
    out
}

/// Formats a probed duration for metadata.
pub fn format_duration(duration: Option<f64>) -> String {
    match duration {
        Some(d) if (0.0..=MAX_REPORTED_DURATION).contains(&d) => format!("{:.3}", d),
        _ => "unknown".to_string(),
    }
}

/// Audio parameters and provenance shared by all uploads of one clip.
#[derive(Debug, Clone)]
pub struct UploadContext<'a> {
    pub clip_id: &'a ClipId,
    pub source: &'a str,
    pub created_at: DateTime<Utc>,
    pub duration: Option<f64>,
    pub sample_rate: u32,
    pub channels: u8,
}

impl UploadContext<'_> {
    fn base(&self) -> Vec<(String, String)> {
        vec![
            ("status".into(), "ready_for_asr".into()),
            ("source".into(), self.source.to_string()),
            (
                "created_at".into(),
                self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("clip_id".into(), self.clip_id.to_string()),
            ("sample_rate".into(), self.sample_rate.to_string()),
            ("channels".into(), self.channels.to_string()),
            ("duration".into(), format_duration(self.duration)),
        ]
    }

    pub fn whole_file(&self) -> Metadata {
        sanitize(self.base())
    }

    pub fn chunk(&self, index: usize, total_chunks: usize) -> Metadata {
        let mut entries = self.base();
        entries.push(("chunk_index".into(), index.to_string()));
        entries.push(("total_chunks".into(), total_chunks.to_string()));
        entries.push(("chunk_type".into(), "audio_segment".into()));
        sanitize(entries)
    }
}
