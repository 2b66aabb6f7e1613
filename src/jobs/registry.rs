//! In-memory job registry with bounded completed-job retention.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::AdminError;
use crate::jobs::types::{
    BulkKind, ItemSuccess, JobDetail, JobError, JobProgress, JobStatus, JobSummary,
};

struct JobRecord {
    operation_id: String,
    kind: BulkKind,
    status: JobStatus,
    total: usize,
    successes: Vec<ItemSuccess>,
    errors: Vec<JobError>,
    cancel: Arc<AtomicBool>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn progress(&self) -> JobProgress {
        JobProgress {
            operation_id: self.operation_id.clone(),
            status: self.status,
            total: self.total,
            processed: self.successes.len() + self.errors.len(),
            succeeded: self.successes.len(),
            failed: self.errors.len(),
        }
    }

    fn summary(&self) -> JobSummary {
        JobSummary {
            operation_id: self.operation_id.clone(),
            kind: self.kind,
            status: self.status,
            total: self.total,
            processed: self.successes.len() + self.errors.len(),
            succeeded: self.successes.len(),
            failed: self.errors.len(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    fn detail(&self) -> JobDetail {
        JobDetail {
            operation_id: self.operation_id.clone(),
            kind: self.kind,
            status: self.status,
            total: self.total,
            successes: self.successes.clone(),
            errors: self.errors.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Tracks every job from submission through terminal state.
///
/// Completed records are retained up to a cap; the oldest terminal record
/// is evicted first once the cap is exceeded.
pub struct JobRegistry {
    records: RwLock<HashMap<String, JobRecord>>,
    // ids of terminal records in the order they finished
    terminal_order: RwLock<VecDeque<String>>,
    max_completed_retained: usize,
}

impl JobRegistry {
    /// Create an empty registry retaining at most `max_completed_retained`
    /// terminal records.
    pub fn new(max_completed_retained: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            terminal_order: RwLock::new(VecDeque::new()),
            max_completed_retained,
        }
    }

    /// Register a pending job and return its cancellation flag.
    pub async fn insert(
        &self,
        operation_id: &str,
        kind: BulkKind,
        total: usize,
    ) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        let record = JobRecord {
            operation_id: operation_id.to_string(),
            kind,
            status: JobStatus::Pending,
            total,
            successes: Vec::new(),
            errors: Vec::new(),
            cancel: cancel.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.records
            .write()
            .await
            .insert(operation_id.to_string(), record);
        cancel
    }

    /// Mark a job running. No-op if the job is already terminal.
    pub async fn mark_running(&self, operation_id: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(operation_id) {
            if !record.status.is_terminal() {
                record.status = JobStatus::Running;
                record.started_at = Some(Utc::now());
            }
        }
    }

    /// Append one batch worth of outcomes to a job.
    pub async fn append_outcomes(
        &self,
        operation_id: &str,
        successes: Vec<ItemSuccess>,
        errors: Vec<JobError>,
    ) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(operation_id) {
            record.successes.extend(successes);
            record.errors.extend(errors);
        }
    }

    /// Move a job into a terminal state and evict the oldest terminal
    /// record if the retention cap is exceeded. Terminal states are
    /// final; a second call is a no-op.
    pub async fn mark_terminal(&self, operation_id: &str, status: JobStatus) {
        debug_assert!(status.is_terminal());
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(operation_id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        // An accepted cancel may land after the worker's last flag check but
        // before it reports completion. The write lock makes this check atomic
        // with respect to request_cancel, so the cancel is never lost.
        record.status = if status == JobStatus::Completed && record.cancel.load(Ordering::SeqCst) {
            JobStatus::Cancelled
        } else {
            status
        };
        record.completed_at = Some(Utc::now());

        let mut order = self.terminal_order.write().await;
        order.push_back(operation_id.to_string());
        while order.len() > self.max_completed_retained {
            if let Some(evicted) = order.pop_front() {
                records.remove(&evicted);
                debug!(operation_id = %evicted, "evicted completed job record");
            }
        }
    }

    /// Request cooperative cancellation of a job.
    ///
    /// Fails with [`AdminError::UnknownOperation`] for unknown ids and
    /// [`AdminError::NotCancellable`] for jobs already in a terminal state.
    pub async fn request_cancel(&self, operation_id: &str) -> Result<(), AdminError> {
        let records = self.records.read().await;
        let record = records
            .get(operation_id)
            .ok_or_else(|| AdminError::UnknownOperation(operation_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(AdminError::NotCancellable {
                operation_id: operation_id.to_string(),
                status: format!("{:?}", record.status),
            });
        }
        record.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Current status of a job.
    pub async fn status(&self, operation_id: &str) -> Result<JobStatus, AdminError> {
        let records = self.records.read().await;
        records
            .get(operation_id)
            .map(|record| record.status)
            .ok_or_else(|| AdminError::UnknownOperation(operation_id.to_string()))
    }

    /// Progress counters for a job.
    pub async fn progress(&self, operation_id: &str) -> Result<JobProgress, AdminError> {
        let records = self.records.read().await;
        records
            .get(operation_id)
            .map(JobRecord::progress)
            .ok_or_else(|| AdminError::UnknownOperation(operation_id.to_string()))
    }

    /// Full detail for a job, including per-item outcomes.
    pub async fn detail(&self, operation_id: &str) -> Result<JobDetail, AdminError> {
        let records = self.records.read().await;
        records
            .get(operation_id)
            .map(JobRecord::detail)
            .ok_or_else(|| AdminError::UnknownOperation(operation_id.to_string()))
    }

    /// Summaries of every non-terminal job, newest first.
    pub async fn list_active(&self) -> Vec<JobSummary> {
        let records = self.records.read().await;
        let mut active: Vec<JobSummary> = records
            .values()
            .filter(|record| !record.status.is_terminal())
            .map(JobRecord::summary)
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }

    /// Summaries of every retained terminal job, newest first.
    pub async fn list_completed(&self) -> Vec<JobSummary> {
        let records = self.records.read().await;
        let mut completed: Vec<JobSummary> = records
            .values()
            .filter(|record| record.status.is_terminal())
            .map(JobRecord::summary)
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eviction_drops_oldest_terminal_record() {
        let registry = JobRegistry::new(2);
        for id in ["a", "b", "c"] {
            registry.insert(id, BulkKind::TemplateDelete, 1).await;
            registry.mark_terminal(id, JobStatus::Completed).await;
        }
        assert!(registry.status("a").await.is_err());
        assert!(registry.status("b").await.is_ok());
        assert!(registry.status("c").await.is_ok());
    }

    #[tokio::test]
    async fn cancel_of_terminal_job_is_rejected() {
        let registry = JobRegistry::new(10);
        registry.insert("done", BulkKind::TemplateTag, 1).await;
        registry.mark_terminal("done", JobStatus::Completed).await;
        let err = registry.request_cancel("done").await.unwrap_err();
        assert!(matches!(err, AdminError::NotCancellable { .. }));
    }

    #[tokio::test]
    async fn cancel_before_completion_report_wins() {
        let registry = JobRegistry::new(10);
        registry.insert("late", BulkKind::TemplateDelete, 2).await;
        registry.mark_running("late").await;
        registry.request_cancel("late").await.unwrap();
        registry.mark_terminal("late", JobStatus::Completed).await;
        assert_eq!(
            registry.status("late").await.unwrap(),
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let registry = JobRegistry::new(10);
        registry.insert("j", BulkKind::LinkGeneration, 3).await;
        registry.mark_terminal("j", JobStatus::Cancelled).await;
        registry.mark_terminal("j", JobStatus::Completed).await;
        assert_eq!(registry.status("j").await.unwrap(), JobStatus::Cancelled);
    }
}
