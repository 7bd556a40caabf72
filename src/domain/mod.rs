//! Domain layer - Pure business logic.

pub mod clip;
pub mod metadata;
pub mod processing;
pub mod tasks;

pub use clip::{BatchError, ClipBatch, ClipId, ClipIdError, TranscriptKind, MAX_BATCH_SIZE};
pub use processing::{BatchSummary, ClipProcessingResult, PipelineStage, ProcessingStatusSnapshot};
pub use tasks::{TaskRecord, TaskStats, TaskStatus};
