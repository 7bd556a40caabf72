//! In-memory ledger of background batches.

use crate::domain::processing::BatchSummary;
use crate::domain::tasks::{StatusCounts, TaskRecord, TaskStats, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_ID_ATTEMPTS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("unable to generate a unique task id")]
    IdSpaceExhausted,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// First 16 hex chars of SHA-256 over a microsecond timestamp, a v4 UUID and
/// eight random bytes.
fn primary_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Utc::now().timestamp_micros().to_string());
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(random_hex(8));
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

fn fallback_id() -> String {
    format!("fallback-{}-{}", Utc::now().timestamp_micros(), random_hex(8))
}

fn allocate_id(
    taken: &BTreeMap<String, TaskRecord>,
    mut primary: impl FnMut() -> String,
    fallback: impl FnOnce() -> String,
) -> Result<String, RegistryError> {
    for attempt in 1..=MAX_ID_ATTEMPTS {
        let candidate = primary();
        if !taken.contains_key(&candidate) {
            return Ok(candidate);
        }
        warn!(attempt, "task id collision, retrying");
    }
    let candidate = fallback();
    if taken.contains_key(&candidate) {
        error!("fallback task id collided; refusing to overwrite an existing task");
        return Err(RegistryError::IdSpaceExhausted);
    }
    warn!(task_id = %candidate, "using fallback task id");
    Ok(candidate)
}

/// Task records keyed by ID behind a single mutex. Listing and sweeping copy
/// what they need and release the guard before sorting or filtering.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<BTreeMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, clip_ids: Vec<String>) -> Result<String, RegistryError> {
        self.create_with(clip_ids, primary_id, fallback_id)
    }

    fn create_with(
        &self,
        clip_ids: Vec<String>,
        primary: impl FnMut() -> String,
        fallback: impl FnOnce() -> String,
    ) -> Result<String, RegistryError> {
        let mut tasks = self.tasks.lock();
        let task_id = allocate_id(&tasks, primary, fallback)?;
        let clip_count = clip_ids.len();
        tasks.insert(
            task_id.clone(),
            TaskRecord::queued(task_id.clone(), clip_ids, Utc::now()),
        );
        info!(task_id = %task_id, clips = clip_count, "created task");
        Ok(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.lock().get(task_id).cloned()
    }

    /// `started_at` and `completed_at` are stamped only on the first
    /// transition into Running and into a terminal state respectively.
    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        results: Option<BatchSummary>,
        error: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.lock();
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
        let now = Utc::now();
        record.status = status;
        if status == TaskStatus::Running && record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if status.is_terminal() && record.completed_at.is_none() {
            record.completed_at = Some(now);
        }
        if results.is_some() {
            record.results = results;
        }
        if error.is_some() {
            record.error = error;
        }
        info!(task_id = %task_id, status = status.as_str(), "task status updated");
        Ok(())
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<TaskRecord> {
        let mut snapshot: Vec<TaskRecord> = self.tasks.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshot.truncate(limit);
        snapshot
    }

    pub fn delete(&self, task_id: &str) -> bool {
        let removed = self.tasks.lock().remove(task_id).is_some();
        if removed {
            info!(task_id = %task_id, "deleted task");
        }
        removed
    }

    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(max_age, Utc::now())
    }

    /// Removes terminal tasks created before `now - max_age`. Queued and
    /// running tasks survive regardless of age.
    pub fn sweep_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let snapshot: Vec<(String, TaskStatus, DateTime<Utc>)> = self
            .tasks
            .lock()
            .values()
            .map(|r| (r.task_id.clone(), r.status, r.created_at))
            .collect();
        let expired: Vec<String> = snapshot
            .into_iter()
            .filter(|(_, status, created_at)| status.is_terminal() && *created_at < cutoff)
            .map(|(id, _, _)| id)
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut tasks = self.tasks.lock();
        let mut removed = 0;
        for id in expired {
            // Status may have moved since the snapshot.
            let still_terminal = tasks.get(&id).map_or(false, |r| r.status.is_terminal());
            if still_terminal && tasks.remove(&id).is_some() {
                removed += 1;
            }
        }
        info!(removed, "swept old tasks");
        removed
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn stats(&self) -> TaskStats {
        let statuses: Vec<TaskStatus> = self.tasks.lock().values().map(|r| r.status).collect();
        let mut by_status = StatusCounts::default();
        for status in &statuses {
            match status {
                TaskStatus::Queued => by_status.queued += 1,
                TaskStatus::Running => by_status.running += 1,
                TaskStatus::Completed => by_status.completed += 1,
                TaskStatus::Failed => by_status.failed += 1,
            }
        }
        TaskStats {
            total_tasks: statuses.len(),
            by_status,
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, task_id: &str, created_at: DateTime<Utc>) {
        if let Some(record) = self.tasks.lock().get_mut(task_id) {
            record.created_at = created_at;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "batch panicked".to_string()
    }
}

/// Runs `batch` in the background against `task_id`: Running on start,
/// Completed with the summary on return, Failed if the batch panics. There is
/// no cancellation.
pub fn spawn_tracked<F>(registry: Arc<TaskRegistry>, task_id: String, batch: F) -> JoinHandle<()>
where
    F: Future<Output = BatchSummary> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = registry.update_status(&task_id, TaskStatus::Running, None, None) {
            warn!(task_id = %task_id, error = %e, "task vanished before it started");
        }

        let outcome = match tokio::spawn(batch).await {
            Ok(summary) => {
                info!(
                    task_id = %task_id,
                    successful = summary.successful,
                    failed = summary.failed,
                    "background batch finished"
                );
                registry.update_status(&task_id, TaskStatus::Completed, Some(summary), None)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic().as_ref())
                } else {
                    join_error.to_string()
                };
                error!(task_id = %task_id, error = %message, "background batch failed");
                registry.update_status(&task_id, TaskStatus::Failed, None, Some(message))
            }
        };
        if let Err(e) = outcome {
            warn!(task_id = %task_id, error = %e, "could not record task outcome");
        }
    })
}
