//! Job model shared by the registry, the engine, and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AdminError;
use crate::remote::{EnrollmentLink, TemplateUpgrade};

/// Kind of bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkKind {
    /// Generate enrollment links for users.
    LinkGeneration,
    /// Delete biometric templates.
    TemplateDelete,
    /// Re-encode templates with the current encoder version.
    TemplateUpgrade,
    /// Replace tag sets on templates.
    TemplateTag,
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Registered, waiting for a worker.
    Pending,
    /// A worker is processing batches.
    Running,
    /// All batches drained without cancellation.
    Completed,
    /// Engine-level failure aborted the job.
    Failed,
    /// Cancellation observed at a batch boundary.
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-item success payload; variant depends on the job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemSuccess {
    /// A generated enrollment link.
    EnrollmentLink(EnrollmentLink),
    /// A deleted template.
    TemplateDeleted {
        /// Template class id.
        class_id: i64,
    },
    /// An upgraded template.
    TemplateUpgraded(TemplateUpgrade),
    /// A re-tagged template.
    TemplateTagged {
        /// Template class id.
        class_id: i64,
        /// Tags now attached.
        tags: Vec<String>,
    },
}

/// Per-item failure, immutable once appended to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// String form of the original item key.
    pub item_id: String,
    /// Short machine tag.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether the item may safely be retried later.
    pub retryable: bool,
}

impl JobError {
    /// Build a job error for `item_id` from a classified failure.
    pub fn from_admin_error(item_id: impl Into<String>, error: &AdminError) -> Self {
        Self {
            item_id: item_id.into(),
            code: error.code_tag().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Progress counters for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    /// Job id.
    pub operation_id: String,
    /// Current status.
    pub status: JobStatus,
    /// Items submitted.
    pub total: usize,
    /// `succeeded + failed`.
    pub processed: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
}

/// Lightweight listing entry without per-item detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job id.
    pub operation_id: String,
    /// Job kind.
    pub kind: BulkKind,
    /// Current status.
    pub status: JobStatus,
    /// Items submitted.
    pub total: usize,
    /// `succeeded + failed`.
    pub processed: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Start of processing, if started.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time, if terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Full job detail, available mid-flight and after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    /// Job id.
    pub operation_id: String,
    /// Job kind.
    pub kind: BulkKind,
    /// Current status.
    pub status: JobStatus,
    /// Items submitted.
    pub total: usize,
    /// Per-item successes in completion order (batch order preserved).
    pub successes: Vec<ItemSuccess>,
    /// Per-item errors in completion order (batch order preserved).
    pub errors: Vec<JobError>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Start of processing, if started.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time, if terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Engine configuration; read-only after startup.
#[derive(Debug, Clone)]
pub struct BulkEngineConfig {
    /// Submission-size ceiling; oversized requests fail fast.
    pub max_bulk_operation_size: usize,
    /// Worker-pool width: jobs running at once.
    pub max_concurrent_operations: usize,
    /// Items per batch; also bounds intra-batch parallelism.
    pub batch_size: usize,
    /// Bounded dispatch-queue depth for accepted jobs.
    pub queue_capacity: usize,
    /// Completed records retained before FIFO eviction.
    pub max_completed_retained: usize,
}

impl Default for BulkEngineConfig {
    fn default() -> Self {
        Self {
            max_bulk_operation_size: 1000,
            max_concurrent_operations: 5,
            batch_size: 100,
            queue_capacity: 64,
            max_completed_retained: 1000,
        }
    }
}
