//! Bulk operation engine: bounded queue + concurrent workers.
//!
//! Accepted jobs land on a bounded queue; a dispatch loop leases worker
//! slots from a semaphore and processes each job as an ordered sequence of
//! fixed-size batches. Items within a batch run concurrently; batches never
//! overlap. Cancellation is cooperative and observed at batch boundaries.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::AdminError;
use crate::jobs::registry::JobRegistry;
use crate::jobs::types::{BulkEngineConfig, BulkKind, ItemSuccess, JobError, JobStatus};
use crate::remote::BiometricBackend;

/// Work carried by one queued job.
enum BulkWork {
    LinkGeneration {
        user_ids: Vec<String>,
        validity_hours: u32,
    },
    TemplateDelete {
        class_ids: Vec<i64>,
    },
    TemplateUpgrade {
        class_ids: Vec<i64>,
    },
    TemplateTag {
        class_ids: Vec<i64>,
        tags: Vec<String>,
    },
}

struct QueuedBulkJob {
    operation_id: String,
    cancel: Arc<AtomicBool>,
    work: BulkWork,
}

type ItemFuture = Pin<Box<dyn Future<Output = Result<ItemSuccess, AdminError>> + Send>>;
type ItemOp<I> = Arc<dyn Fn(Arc<dyn BiometricBackend>, I) -> ItemFuture + Send + Sync>;

fn boxed(fut: impl Future<Output = Result<ItemSuccess, AdminError>> + Send + 'static) -> ItemFuture {
    Box::pin(fut)
}

/// Runs bulk operations against the biometric backend.
pub struct BulkEngine {
    backend: Arc<dyn BiometricBackend>,
    registry: Arc<JobRegistry>,
    queue_tx: mpsc::Sender<QueuedBulkJob>,
    config: BulkEngineConfig,
}

impl BulkEngine {
    /// Start the engine and its dispatch loop.
    pub fn start(backend: Arc<dyn BiometricBackend>, mut config: BulkEngineConfig) -> Arc<Self> {
        config.max_bulk_operation_size = config.max_bulk_operation_size.max(1);
        config.max_concurrent_operations = config.max_concurrent_operations.max(1);
        config.batch_size = config.batch_size.max(1);
        config.queue_capacity = config.queue_capacity.max(1);
        config.max_completed_retained = config.max_completed_retained.max(1);

        let (queue_tx, queue_rx) = mpsc::channel::<QueuedBulkJob>(config.queue_capacity);
        let registry = Arc::new(JobRegistry::new(config.max_completed_retained));

        let engine = Arc::new(Self {
            backend,
            registry,
            queue_tx,
            config,
        });
        engine.spawn_dispatch_loop(queue_rx);
        engine
    }

    /// Registry backing this engine.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    fn spawn_dispatch_loop(self: &Arc<Self>, mut queue_rx: mpsc::Receiver<QueuedBulkJob>) {
        let engine = Arc::clone(self);
        let max_in_flight = engine.config.max_concurrent_operations;
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(max_in_flight));
            let mut workers = JoinSet::new();

            while let Some(job) = queue_rx.recv().await {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker_engine = Arc::clone(&engine);
                workers.spawn(async move {
                    let _permit = permit;
                    worker_engine.process_job(job).await;
                });

                while let Some(result) = workers.try_join_next() {
                    if let Err(error) = result {
                        error!("bulk operation worker crashed: {error}");
                    }
                }
            }

            while let Some(result) = workers.join_next().await {
                if let Err(error) = result {
                    error!("bulk operation worker crashed: {error}");
                }
            }
        });
    }

    /// Submit a link-generation job for `user_ids`.
    pub async fn submit_link_generation(
        &self,
        user_ids: Vec<String>,
        validity_hours: u32,
    ) -> Result<String, AdminError> {
        self.validate_size(user_ids.len())?;
        if user_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(AdminError::Validation(
                "user ids must be non-empty".to_string(),
            ));
        }
        if validity_hours == 0 {
            return Err(AdminError::Validation(
                "link validity must be at least one hour".to_string(),
            ));
        }
        let total = user_ids.len();
        self.enqueue(
            BulkKind::LinkGeneration,
            total,
            BulkWork::LinkGeneration {
                user_ids,
                validity_hours,
            },
        )
        .await
    }

    /// Submit a template-delete job for `class_ids`.
    pub async fn submit_template_delete(&self, class_ids: Vec<i64>) -> Result<String, AdminError> {
        self.validate_class_ids(&class_ids)?;
        let total = class_ids.len();
        self.enqueue(
            BulkKind::TemplateDelete,
            total,
            BulkWork::TemplateDelete { class_ids },
        )
        .await
    }

    /// Submit a template-upgrade job for `class_ids`.
    pub async fn submit_template_upgrade(&self, class_ids: Vec<i64>) -> Result<String, AdminError> {
        self.validate_class_ids(&class_ids)?;
        let total = class_ids.len();
        self.enqueue(
            BulkKind::TemplateUpgrade,
            total,
            BulkWork::TemplateUpgrade { class_ids },
        )
        .await
    }

    /// Submit a tag-replacement job: `tags` replaces the tag set on every
    /// template in `class_ids`. An empty `tags` clears them.
    pub async fn submit_template_tag(
        &self,
        class_ids: Vec<i64>,
        tags: Vec<String>,
    ) -> Result<String, AdminError> {
        self.validate_class_ids(&class_ids)?;
        if tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(AdminError::Validation("tags must be non-empty".to_string()));
        }
        let total = class_ids.len();
        self.enqueue(
            BulkKind::TemplateTag,
            total,
            BulkWork::TemplateTag { class_ids, tags },
        )
        .await
    }

    fn validate_size(&self, count: usize) -> Result<(), AdminError> {
        if count == 0 {
            return Err(AdminError::Validation(
                "bulk request must contain at least one item".to_string(),
            ));
        }
        if count > self.config.max_bulk_operation_size {
            return Err(AdminError::Validation(format!(
                "bulk request has {count} items, maximum is {}",
                self.config.max_bulk_operation_size
            )));
        }
        Ok(())
    }

    fn validate_class_ids(&self, class_ids: &[i64]) -> Result<(), AdminError> {
        self.validate_size(class_ids.len())?;
        if class_ids.iter().any(|id| *id <= 0) {
            return Err(AdminError::Validation(
                "class ids must be positive".to_string(),
            ));
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        kind: BulkKind,
        total: usize,
        work: BulkWork,
    ) -> Result<String, AdminError> {
        let operation_id = Uuid::new_v4().to_string();
        let cancel = self.registry.insert(&operation_id, kind, total).await;
        info!(
            event = "bulk.job.accepted",
            operation_id = %operation_id,
            kind = ?kind,
            total,
            "bulk job accepted"
        );

        let queued = QueuedBulkJob {
            operation_id: operation_id.clone(),
            cancel,
            work,
        };
        if self.queue_tx.send(queued).await.is_err() {
            self.registry
                .mark_terminal(&operation_id, JobStatus::Failed)
                .await;
            return Err(AdminError::Internal(
                "bulk operation queue is closed".to_string(),
            ));
        }
        Ok(operation_id)
    }

    async fn process_job(self: Arc<Self>, job: QueuedBulkJob) {
        self.registry.mark_running(&job.operation_id).await;

        let QueuedBulkJob {
            operation_id,
            cancel,
            work,
        } = job;
        let status = match work {
            BulkWork::LinkGeneration {
                user_ids,
                validity_hours,
            } => {
                self.run_batches(
                    &operation_id,
                    &cancel,
                    user_ids,
                    |user_id: &String| user_id.clone(),
                    Arc::new(move |backend, user_id: String| {
                        boxed(async move {
                            backend
                                .generate_enrollment_link(&user_id, validity_hours)
                                .await
                                .map(ItemSuccess::EnrollmentLink)
                        })
                    }),
                )
                .await
            }
            BulkWork::TemplateDelete { class_ids } => {
                self.run_batches(
                    &operation_id,
                    &cancel,
                    class_ids,
                    |class_id: &i64| class_id.to_string(),
                    Arc::new(|backend, class_id: i64| {
                        boxed(async move {
                            backend.delete_template(class_id).await?;
                            Ok(ItemSuccess::TemplateDeleted { class_id })
                        })
                    }),
                )
                .await
            }
            BulkWork::TemplateUpgrade { class_ids } => {
                self.run_batches(
                    &operation_id,
                    &cancel,
                    class_ids,
                    |class_id: &i64| class_id.to_string(),
                    Arc::new(|backend, class_id: i64| {
                        boxed(async move {
                            backend
                                .upgrade_template(class_id)
                                .await
                                .map(ItemSuccess::TemplateUpgraded)
                        })
                    }),
                )
                .await
            }
            BulkWork::TemplateTag { class_ids, tags } => {
                let tags = Arc::new(tags);
                self.run_batches(
                    &operation_id,
                    &cancel,
                    class_ids,
                    |class_id: &i64| class_id.to_string(),
                    Arc::new(move |backend, class_id: i64| {
                        let tags = Arc::clone(&tags);
                        boxed(async move {
                            backend.set_template_tags(class_id, &tags).await?;
                            Ok(ItemSuccess::TemplateTagged {
                                class_id,
                                tags: tags.as_ref().clone(),
                            })
                        })
                    }),
                )
                .await
            }
        };

        info!(
            event = "bulk.job.finished",
            operation_id = %operation_id,
            status = ?status,
            "bulk job finished"
        );
    }

    /// Drain `items` in ordered batches of `batch_size`. Items inside a
    /// batch run concurrently; the next batch starts only after every task
    /// of the previous one has settled. A set cancel flag stops the job at
    /// the next batch boundary. A panicked item task fails the whole job.
    async fn run_batches<I>(
        &self,
        operation_id: &str,
        cancel: &Arc<AtomicBool>,
        items: Vec<I>,
        item_id: impl Fn(&I) -> String + Send + Sync,
        op: ItemOp<I>,
    ) -> JobStatus
    where
        I: Send + 'static,
    {
        let mut remaining = items.into_iter();
        loop {
            if cancel.load(Ordering::SeqCst) {
                self.registry
                    .mark_terminal(operation_id, JobStatus::Cancelled)
                    .await;
                return JobStatus::Cancelled;
            }

            let batch: Vec<I> = remaining.by_ref().take(self.config.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            debug!(
                operation_id = %operation_id,
                batch_len = batch.len(),
                "processing batch"
            );

            let mut tasks = JoinSet::new();
            for (index, item) in batch.into_iter().enumerate() {
                let id = item_id(&item);
                let backend = Arc::clone(&self.backend);
                let op = Arc::clone(&op);
                tasks.spawn(async move { (index, id, op(backend, item).await) });
            }

            let mut successes: Vec<(usize, ItemSuccess)> = Vec::new();
            let mut errors: Vec<(usize, JobError)> = Vec::new();
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok((index, _, Ok(success))) => successes.push((index, success)),
                    Ok((index, id, Err(error))) => {
                        errors.push((index, JobError::from_admin_error(id, &error)));
                    }
                    Err(join_error) => {
                        error!(
                            operation_id = %operation_id,
                            "bulk item task crashed: {join_error}"
                        );
                        tasks.abort_all();
                        self.registry
                            .mark_terminal(operation_id, JobStatus::Failed)
                            .await;
                        return JobStatus::Failed;
                    }
                }
            }
            successes.sort_by_key(|(index, _)| *index);
            errors.sort_by_key(|(index, _)| *index);
            self.registry
                .append_outcomes(
                    operation_id,
                    successes.into_iter().map(|(_, s)| s).collect(),
                    errors.into_iter().map(|(_, e)| e).collect(),
                )
                .await;
        }

        self.registry
            .mark_terminal(operation_id, JobStatus::Completed)
            .await;
        JobStatus::Completed
    }
}
