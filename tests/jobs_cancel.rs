#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use face_bulk_admin::{
    AdminError, BiometricBackend, BulkEngine, BulkEngineConfig, EnrollmentLink, EnrollmentOutcome,
    JobRegistry, JobStatus, LivenessOutcome, RemoteErrorCode, TemplateStatus, TemplateUpgrade,
    VerificationOutcome,
};

/// Backend double with a fixed per-call delay so a job stays in flight
/// long enough to be cancelled.
struct SlowBackend {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowBackend {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    async fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
    }

    fn rejected<T>(&self) -> Result<T, AdminError> {
        Err(AdminError::remote(
            RemoteErrorCode::Rejected,
            "not used in this test".to_string(),
        ))
    }
}

#[async_trait]
impl BiometricBackend for SlowBackend {
    async fn generate_enrollment_link(
        &self,
        user_id: &str,
        validity_hours: u32,
    ) -> Result<EnrollmentLink, AdminError> {
        self.tick().await;
        Ok(EnrollmentLink {
            user_id: user_id.to_string(),
            enrollment_url: format!("https://enroll.test/enroll?user={user_id}"),
            token: "tok".to_string(),
            expires_at: Utc::now() + chrono::TimeDelta::hours(i64::from(validity_hours)),
        })
    }

    async fn enroll(
        &self,
        _class_id: i64,
        _images: Vec<String>,
    ) -> Result<EnrollmentOutcome, AdminError> {
        self.rejected()
    }

    async fn verify(
        &self,
        _class_id: i64,
        _image: String,
    ) -> Result<VerificationOutcome, AdminError> {
        self.rejected()
    }

    async fn delete_template(&self, _class_id: i64) -> Result<(), AdminError> {
        self.tick().await;
        Ok(())
    }

    async fn template_status(&self, _class_id: i64) -> Result<TemplateStatus, AdminError> {
        self.rejected()
    }

    async fn upgrade_template(&self, _class_id: i64) -> Result<TemplateUpgrade, AdminError> {
        self.rejected()
    }

    async fn set_template_tags(&self, _class_id: i64, _tags: &[String]) -> Result<(), AdminError> {
        self.tick().await;
        Ok(())
    }

    async fn liveness_check(&self, _images: Vec<String>) -> Result<LivenessOutcome, AdminError> {
        self.rejected()
    }
}

async fn wait_for_terminal(registry: &Arc<JobRegistry>, operation_id: &str) -> JobStatus {
    for _ in 0..400 {
        let status = registry.status(operation_id).await.expect("job exists");
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached a terminal state");
}

#[tokio::test]
async fn cancel_stops_the_job_at_the_next_batch_boundary() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(150)));
    let engine = BulkEngine::start(
        backend.clone(),
        BulkEngineConfig {
            batch_size: 2,
            ..BulkEngineConfig::default()
        },
    );

    let operation_id = engine
        .submit_template_delete(vec![1, 2, 3, 4, 5, 6])
        .await
        .expect("submit should succeed");

    // Let the first batch start, then cancel while it is in flight.
    tokio::time::sleep(Duration::from_millis(40)).await;
    engine
        .registry()
        .request_cancel(&operation_id)
        .await
        .expect("running job is cancellable");

    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Cancelled);

    let progress = engine.registry().progress(&operation_id).await.unwrap();
    assert!(progress.processed <= progress.total);
    // The in-flight batch finishes; nothing after the boundary starts.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(progress.processed, 2);
}

#[tokio::test]
async fn cancelled_job_keeps_outcomes_recorded_before_the_boundary() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(100)));
    let engine = BulkEngine::start(
        backend,
        BulkEngineConfig {
            batch_size: 3,
            ..BulkEngineConfig::default()
        },
    );

    let operation_id = engine
        .submit_template_tag(vec![10, 20, 30, 40], vec!["expired".to_string()])
        .await
        .expect("submit should succeed");
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine
        .registry()
        .request_cancel(&operation_id)
        .await
        .expect("running job is cancellable");

    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Cancelled);

    let detail = engine.registry().detail(&operation_id).await.unwrap();
    assert_eq!(detail.successes.len(), 3);
    assert!(detail.errors.is_empty());
}

#[tokio::test]
async fn cancel_of_unknown_operation_is_an_error() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(1)));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let err = engine
        .registry()
        .request_cancel("no-such-operation")
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::UnknownOperation(_)));
}

#[tokio::test]
async fn cancel_after_completion_is_rejected() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(1)));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let operation_id = engine
        .submit_template_delete(vec![1])
        .await
        .expect("submit should succeed");
    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Completed);

    let err = engine
        .registry()
        .request_cancel(&operation_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::NotCancellable { .. }));
}
