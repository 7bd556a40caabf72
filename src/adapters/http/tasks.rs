use super::AppState;
use crate::application::task_registry::RegistryError;
use crate::domain::{TaskRecord, TaskStats};
use crate::error::ApiError;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

const DEFAULT_TASK_LIST_LIMIT: usize = 50;
const DEFAULT_MAX_AGE_HOURS: i64 = 24;
/// Ten years; anything older is swept anyway.
const MAX_AGE_HOURS_CAP: i64 = 87_600;

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    state
        .registry
        .get(&task_id)
        .map(Json)
        .ok_or(ApiError::from(RegistryError::NotFound(task_id)))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    params: Result<Query<ListTasksParams>, QueryRejection>,
) -> Result<Json<TaskList>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let tasks = state
        .registry
        .list(params.limit.unwrap_or(DEFAULT_TASK_LIST_LIMIT));
    Ok(Json(TaskList {
        total: tasks.len(),
        tasks,
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.registry.delete(&task_id) {
        return Err(RegistryError::NotFound(task_id).into());
    }
    Ok(Json(MessageResponse {
        message: format!("Task {} deleted", task_id),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SweepParams {
    pub max_age_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub message: String,
    pub cleaned_count: usize,
}

pub async fn cleanup_tasks(
    State(state): State<AppState>,
    params: Result<Query<SweepParams>, QueryRejection>,
) -> Result<Json<SweepResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let hours = params.max_age_hours.unwrap_or(DEFAULT_MAX_AGE_HOURS);
    if hours < 0 {
        return Err(ApiError::Validation("max_age_hours must not be negative".into()));
    }
    let max_age = chrono::Duration::hours(hours.min(MAX_AGE_HOURS_CAP));
    let cleaned_count = state.registry.sweep(max_age);
    Ok(Json(SweepResponse {
        message: format!("Cleaned up {} old tasks", cleaned_count),
        cleaned_count,
    }))
}

pub async fn task_stats(State(state): State<AppState>) -> Json<TaskStats> {
    Json(state.registry.stats())
}
