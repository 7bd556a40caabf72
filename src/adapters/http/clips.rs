use super::AppState;
use crate::application::catalog::{CleanupReport, ClipStatus, ProcessedPage};
use crate::application::task_registry::spawn_tracked;
use crate::domain::{BatchSummary, ClipBatch, ClipId};
use crate::error::ApiError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ProcessClipsRequest {
    pub clip_ids: Vec<String>,
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessClipsResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BatchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

pub async fn process_clips(
    State(state): State<AppState>,
    payload: Result<Json<ProcessClipsRequest>, JsonRejection>,
) -> Result<Json<ProcessClipsResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let batch = ClipBatch::parse(&request.clip_ids)?;

    if request.background {
        let task_id = state.registry.create(batch.to_strings())?;
        info!(task_id = %task_id, clips = batch.len(), "queued background batch");
        let message = format!("Processing {} clips in background", batch.len());
        let pipeline = state.pipeline.clone();
        spawn_tracked(state.registry.clone(), task_id.clone(), async move {
            pipeline.process_batch(&batch).await
        });
        return Ok(Json(ProcessClipsResponse {
            success: true,
            message,
            results: None,
            task_id: Some(task_id),
        }));
    }

    let summary = state.pipeline.process_batch(&batch).await;
    Ok(Json(ProcessClipsResponse {
        success: summary.failed == 0,
        message: format!(
            "Processed {}/{} clips successfully",
            summary.successful, summary.total
        ),
        results: Some(summary),
        task_id: None,
    }))
}

pub async fn clip_status(
    State(state): State<AppState>,
    Path(clip_id): Path<String>,
) -> Result<Json<ClipStatus>, ApiError> {
    let clip_id = ClipId::parse(&clip_id)?;
    Ok(Json(state.catalog.status(&clip_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn list_processed_clips(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ProcessedPage>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let page = state
        .catalog
        .list_processed(params.limit, params.cursor)
        .await?;
    Ok(Json(page))
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub confirm: bool,
}

/// Answers 207 Multi-Status when some deletions failed.
pub async fn cleanup_clip(
    State(state): State<AppState>,
    Path(clip_id): Path<String>,
    params: Result<Query<CleanupParams>, QueryRejection>,
) -> Result<(StatusCode, Json<CleanupReport>), ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let clip_id = ClipId::parse(&clip_id)?;
    let report = state
        .catalog
        .cleanup(&clip_id, params.dry_run, params.confirm)
        .await?;
    let status = if report.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}
