use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::processing::BatchSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and Failed records are eligible for the age-based sweep.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A background batch tracked by the task registry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub clip_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Set the first time the task enters Running.
    pub started_at: Option<DateTime<Utc>>,
    /// Set the first time the task enters Completed or Failed.
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Option<BatchSummary>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn queued(task_id: String, clip_ids: Vec<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            clip_ids,
            created_at,
            started_at: None,
            completed_at: None,
            results: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub by_status: StatusCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_lowercase_status_and_rfc3339() {
        let created = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = TaskRecord::queued("t1".into(), vec!["abc".into()], created);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["created_at"], "2024-05-01T10:00:00Z");
        assert!(json["started_at"].is_null());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
