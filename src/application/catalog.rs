//! Read-mostly queries over stored clip artifacts: status, listing, cleanup.

use crate::domain::clip::{clip_id_from_audio_key, AUDIO_PREFIX};
use crate::domain::{ClipId, TranscriptKind};
use crate::ports::storage::{ObjectStore, StorageError};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 1000;
const CHUNK_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Storage service temporarily unavailable")]
    Unavailable,
    #[error("Actual deletion requires confirm=true parameter. Use dry_run=true for preview.")]
    ConfirmationRequired,
    #[error("Failed to list clips: {0}")]
    Listing(#[source] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipStatus {
    pub clip_id: String,
    pub video_stored: bool,
    pub audio_processed: bool,
    pub transcript_ready: bool,
    pub ready_for_transcription: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedPage {
    pub total_processed: usize,
    pub clips: Vec<String>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub total_files: usize,
    pub successfully_deleted: usize,
    pub failed_deletions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub clip_id: String,
    pub dry_run: bool,
    pub message: String,
    pub files_to_delete: Vec<String>,
    pub deleted_files: Vec<String>,
    pub failed_deletions: Vec<FailedDeletion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CleanupSummary>,
}

impl CleanupReport {
    /// Some deletions failed while others may have gone through.
    pub fn is_partial(&self) -> bool {
        !self.failed_deletions.is_empty()
    }
}

/// Clamps a requested page size into `1..=MAX_LIST_LIMIT`.
pub fn clamp_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

pub struct ClipCatalog<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ObjectStore + ?Sized> ClipCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Probes each key concurrently. `None` marks a probe that errored.
    async fn probe_all(&self, keys: &[String]) -> Vec<Option<bool>> {
        let probes = keys.iter().map(|key| async move {
            match self.store.exists(key).await {
                Ok(found) => Some(found),
                Err(e) => {
                    error!(key = %key, error = %e, "existence check failed");
                    None
                }
            }
        });
        join_all(probes).await
    }

    pub async fn status(&self, clip_id: &ClipId) -> Result<ClipStatus, CatalogError> {
        let keys = [
            clip_id.video_key(),
            clip_id.audio_key(),
            clip_id.transcript_key(TranscriptKind::Json),
        ];
        let probes = self.probe_all(&keys).await;
        if probes.iter().all(Option::is_none) {
            return Err(CatalogError::Unavailable);
        }

        let found = |i: usize| probes[i].unwrap_or(false);
        let (video_stored, audio_processed, transcript_ready) = (found(0), found(1), found(2));
        Ok(ClipStatus {
            clip_id: clip_id.to_string(),
            video_stored,
            audio_processed,
            transcript_ready,
            ready_for_transcription: audio_processed && !transcript_ready,
        })
    }

    /// One page of processed clips. Only top-level `audio/{id}.wav` keys
    /// count, so chunk keys on the same page are skipped.
    pub async fn list_processed(
        &self,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<ProcessedPage, CatalogError> {
        let prefix = format!("{}/", AUDIO_PREFIX);
        let page = self
            .store
            .list(&prefix, clamp_limit(limit), cursor)
            .await
            .map_err(CatalogError::Listing)?;
        let clips: Vec<String> = page
            .keys
            .iter()
            .filter_map(|key| clip_id_from_audio_key(key))
            .map(str::to_string)
            .collect();
        Ok(ProcessedPage {
            total_processed: clips.len(),
            clips,
            cursor: page.cursor,
            has_more: page.truncated,
        })
    }

    /// Finds every stored artifact of a clip and, when asked, deletes them.
    ///
    /// Real deletion needs both `dry_run = false` and `confirm = true`.
    /// Keys whose probe errored are left out of the plan.
    pub async fn cleanup(
        &self,
        clip_id: &ClipId,
        dry_run: bool,
        confirm: bool,
    ) -> Result<CleanupReport, CatalogError> {
        if !dry_run && !confirm {
            return Err(CatalogError::ConfirmationRequired);
        }

        let mut candidates = vec![clip_id.video_key(), clip_id.audio_key()];
        candidates.extend(TranscriptKind::ALL.iter().map(|kind| clip_id.transcript_key(*kind)));
        let probes = self.probe_all(&candidates).await;

        let chunk_listing = self
            .store
            .list(&clip_id.chunk_dir_prefix(), CHUNK_SCAN_LIMIT, None)
            .await;

        let mut files_to_delete: Vec<String> = candidates
            .into_iter()
            .zip(&probes)
            .filter(|(_, probe)| **probe == Some(true))
            .map(|(key, _)| key)
            .collect();
        match chunk_listing {
            Ok(page) => files_to_delete.extend(page.keys),
            Err(e) => {
                if probes.iter().all(Option::is_none) {
                    return Err(CatalogError::Unavailable);
                }
                warn!(clip_id = %clip_id, error = %e, "chunk listing failed, chunks skipped");
            }
        }

        let mut report = CleanupReport {
            clip_id: clip_id.to_string(),
            dry_run,
            message: String::new(),
            files_to_delete,
            deleted_files: Vec::new(),
            failed_deletions: Vec::new(),
            summary: None,
        };

        if report.files_to_delete.is_empty() {
            report.message = "No files found for this clip".to_string();
            return Ok(report);
        }
        if dry_run {
            report.message = "Dry run - no files were actually deleted".to_string();
            return Ok(report);
        }

        for key in &report.files_to_delete {
            match self.store.delete(key).await {
                Ok(()) => {
                    info!(clip_id = %clip_id, key = %key, "deleted");
                    report.deleted_files.push(key.clone());
                }
                Err(e) => {
                    error!(clip_id = %clip_id, key = %key, error = %e, "delete failed");
                    report.failed_deletions.push(FailedDeletion {
                        file: key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.message = if report.is_partial() {
            format!(
                "Partial cleanup completed. {} files deleted, {} failed.",
                report.deleted_files.len(),
                report.failed_deletions.len()
            )
        } else {
            format!(
                "Successfully deleted {} files for clip {}",
                report.deleted_files.len(),
                clip_id
            )
        };
        report.summary = Some(CleanupSummary {
            total_files: report.files_to_delete.len(),
            successfully_deleted: report.deleted_files.len(),
            failed_deletions: report.failed_deletions.len(),
        });
        Ok(report)
    }
}
