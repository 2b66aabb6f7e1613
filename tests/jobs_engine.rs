#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use face_bulk_admin::{
    AdminError, BiometricBackend, BulkEngine, BulkEngineConfig, CURRENT_ENCODER_VERSION,
    EnrollmentLink, EnrollmentOutcome, ItemSuccess, JobRegistry, JobStatus, LivenessOutcome,
    RemoteErrorCode, TemplateStatus, TemplateUpgrade, VerificationOutcome,
};

/// Backend double: records calls, fails configured class ids.
struct MockBackend {
    failing: HashSet<i64>,
    delete_calls: Mutex<Vec<i64>>,
}

impl MockBackend {
    fn new(failing: &[i64]) -> Self {
        Self {
            failing: failing.iter().copied().collect(),
            delete_calls: Mutex::new(Vec::new()),
        }
    }

    fn check(&self, class_id: i64) -> Result<(), AdminError> {
        if self.failing.contains(&class_id) {
            return Err(AdminError::remote(
                RemoteErrorCode::ServiceUnavailable,
                format!("backend unavailable for {class_id}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BiometricBackend for MockBackend {
    async fn generate_enrollment_link(
        &self,
        user_id: &str,
        validity_hours: u32,
    ) -> Result<EnrollmentLink, AdminError> {
        Ok(EnrollmentLink {
            user_id: user_id.to_string(),
            enrollment_url: format!("https://enroll.test/enroll?user={user_id}"),
            token: format!("tok-{user_id}"),
            expires_at: Utc::now() + chrono::TimeDelta::hours(i64::from(validity_hours)),
        })
    }

    async fn enroll(
        &self,
        class_id: i64,
        images: Vec<String>,
    ) -> Result<EnrollmentOutcome, AdminError> {
        self.check(class_id)?;
        Ok(EnrollmentOutcome {
            class_id,
            enrolled: true,
            feature_vectors: u32::try_from(images.len()).unwrap_or(0),
        })
    }

    async fn verify(
        &self,
        class_id: i64,
        _image: String,
    ) -> Result<VerificationOutcome, AdminError> {
        self.check(class_id)?;
        Ok(VerificationOutcome {
            class_id,
            verified: true,
            score: 0.97,
        })
    }

    async fn delete_template(&self, class_id: i64) -> Result<(), AdminError> {
        self.check(class_id)?;
        self.delete_calls.lock().unwrap().push(class_id);
        Ok(())
    }

    async fn template_status(&self, class_id: i64) -> Result<TemplateStatus, AdminError> {
        self.check(class_id)?;
        Ok(TemplateStatus {
            class_id,
            available: true,
            encoder_version: 2,
            thumbnails_stored: 3,
            tags: Vec::new(),
        })
    }

    async fn upgrade_template(&self, class_id: i64) -> Result<TemplateUpgrade, AdminError> {
        self.check(class_id)?;
        Ok(TemplateUpgrade {
            class_id,
            previous_version: 2,
            new_version: CURRENT_ENCODER_VERSION,
        })
    }

    async fn set_template_tags(&self, class_id: i64, _tags: &[String]) -> Result<(), AdminError> {
        self.check(class_id)
    }

    async fn liveness_check(&self, _images: Vec<String>) -> Result<LivenessOutcome, AdminError> {
        Ok(LivenessOutcome {
            live: true,
            score: 0.99,
        })
    }
}

fn small_batches() -> BulkEngineConfig {
    BulkEngineConfig {
        batch_size: 2,
        ..BulkEngineConfig::default()
    }
}

async fn wait_for_terminal(registry: &Arc<JobRegistry>, operation_id: &str) -> JobStatus {
    for _ in 0..200 {
        let status = registry.status(operation_id).await.expect("job exists");
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached a terminal state");
}

#[tokio::test]
async fn delete_job_completes_and_accounts_for_every_item() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend.clone(), small_batches());

    let operation_id = engine
        .submit_template_delete(vec![101, 102, 103])
        .await
        .expect("submit should succeed");

    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Completed);

    let progress = engine.registry().progress(&operation_id).await.unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.processed, 3);
    assert_eq!(progress.succeeded, 3);
    assert_eq!(progress.failed, 0);

    let mut calls = backend.delete_calls.lock().unwrap().clone();
    calls.sort_unstable();
    assert_eq!(calls, vec![101, 102, 103]);
}

#[tokio::test]
async fn oversized_request_fails_fast_without_registering_a_job() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let class_ids: Vec<i64> = (1..=1500).collect();
    let err = engine.submit_template_delete(class_ids).await.unwrap_err();
    assert!(matches!(err, AdminError::Validation(_)));
    assert!(engine.registry().list_active().await.is_empty());
}

#[tokio::test]
async fn empty_request_is_rejected() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let err = engine.submit_template_delete(Vec::new()).await.unwrap_err();
    assert!(matches!(err, AdminError::Validation(_)));
}

#[tokio::test]
async fn item_failures_are_recorded_without_aborting_the_job() {
    let backend = Arc::new(MockBackend::new(&[102, 104]));
    let engine = BulkEngine::start(backend, small_batches());

    let operation_id = engine
        .submit_template_delete(vec![101, 102, 103, 104, 105])
        .await
        .expect("submit should succeed");

    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Completed);

    let detail = engine.registry().detail(&operation_id).await.unwrap();
    assert_eq!(detail.successes.len(), 3);
    assert_eq!(detail.errors.len(), 2);

    let failed_ids: Vec<&str> = detail.errors.iter().map(|e| e.item_id.as_str()).collect();
    assert_eq!(failed_ids, vec!["102", "104"]);
    assert!(detail.errors.iter().all(|e| e.retryable));
    assert!(
        detail
            .errors
            .iter()
            .all(|e| e.code == "SERVICE_UNAVAILABLE")
    );
}

#[tokio::test]
async fn successes_preserve_submission_order() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, small_batches());

    let operation_id = engine
        .submit_template_delete(vec![5, 4, 3, 2, 1])
        .await
        .expect("submit should succeed");
    wait_for_terminal(engine.registry(), &operation_id).await;

    let detail = engine.registry().detail(&operation_id).await.unwrap();
    let order: Vec<i64> = detail
        .successes
        .iter()
        .map(|s| match s {
            ItemSuccess::TemplateDeleted { class_id } => *class_id,
            other => panic!("unexpected success variant: {other:?}"),
        })
        .collect();
    assert_eq!(order, vec![5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn link_generation_job_yields_one_link_per_user() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, small_batches());

    let operation_id = engine
        .submit_link_generation(
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            24,
        )
        .await
        .expect("submit should succeed");
    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Completed);

    let detail = engine.registry().detail(&operation_id).await.unwrap();
    assert_eq!(detail.successes.len(), 3);
    let users: Vec<&str> = detail
        .successes
        .iter()
        .map(|s| match s {
            ItemSuccess::EnrollmentLink(link) => link.user_id.as_str(),
            other => panic!("unexpected success variant: {other:?}"),
        })
        .collect();
    assert_eq!(users, vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn upgrade_job_reports_version_transition() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let operation_id = engine
        .submit_template_upgrade(vec![7])
        .await
        .expect("submit should succeed");
    wait_for_terminal(engine.registry(), &operation_id).await;

    let detail = engine.registry().detail(&operation_id).await.unwrap();
    match &detail.successes[0] {
        ItemSuccess::TemplateUpgraded(upgrade) => {
            assert_eq!(upgrade.previous_version, 2);
            assert_eq!(upgrade.new_version, CURRENT_ENCODER_VERSION);
        }
        other => panic!("unexpected success variant: {other:?}"),
    }
}

#[tokio::test]
async fn non_positive_class_ids_are_rejected() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let err = engine
        .submit_template_upgrade(vec![3, 0, 9])
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::Validation(_)));
}

/// Backend double whose delete panics on one class id, counting calls.
struct PanickingBackend {
    panic_on: i64,
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl BiometricBackend for PanickingBackend {
    async fn generate_enrollment_link(
        &self,
        _user_id: &str,
        _validity_hours: u32,
    ) -> Result<EnrollmentLink, AdminError> {
        unimplemented!()
    }

    async fn enroll(
        &self,
        _class_id: i64,
        _images: Vec<String>,
    ) -> Result<EnrollmentOutcome, AdminError> {
        unimplemented!()
    }

    async fn verify(
        &self,
        _class_id: i64,
        _image: String,
    ) -> Result<VerificationOutcome, AdminError> {
        unimplemented!()
    }

    async fn delete_template(&self, class_id: i64) -> Result<(), AdminError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        assert_ne!(class_id, self.panic_on, "backend crashed");
        Ok(())
    }

    async fn template_status(&self, _class_id: i64) -> Result<TemplateStatus, AdminError> {
        unimplemented!()
    }

    async fn upgrade_template(&self, _class_id: i64) -> Result<TemplateUpgrade, AdminError> {
        unimplemented!()
    }

    async fn set_template_tags(&self, _class_id: i64, _tags: &[String]) -> Result<(), AdminError> {
        unimplemented!()
    }

    async fn liveness_check(&self, _images: Vec<String>) -> Result<LivenessOutcome, AdminError> {
        unimplemented!()
    }
}

#[tokio::test]
async fn panicking_item_task_fails_the_whole_job() {
    let backend = Arc::new(PanickingBackend {
        panic_on: 102,
        calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let engine = BulkEngine::start(backend.clone(), small_batches());

    let operation_id = engine
        .submit_template_delete(vec![101, 102, 103, 104, 105, 106])
        .await
        .expect("submit should succeed");

    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Failed);

    let detail = engine.registry().detail(&operation_id).await.unwrap();
    assert!(detail.completed_at.is_some());

    // Only the first batch ever started.
    let calls = backend.calls.load(std::sync::atomic::Ordering::SeqCst);
    assert!(calls <= 2, "batches after the crash ran: {calls} calls");
}

#[tokio::test]
async fn terminal_status_remains_stable_after_completion() {
    let backend = Arc::new(MockBackend::new(&[]));
    let engine = BulkEngine::start(backend, BulkEngineConfig::default());

    let operation_id = engine
        .submit_template_tag(vec![11, 12], vec!["batch-2026".to_string()])
        .await
        .expect("submit should succeed");
    let status = wait_for_terminal(engine.registry(), &operation_id).await;
    assert_eq!(status, JobStatus::Completed);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let again = engine.registry().status(&operation_id).await.unwrap();
    assert_eq!(again, JobStatus::Completed);

    let completed = engine.registry().list_completed().await;
    assert_eq!(completed.len(), 1);
    assert!(completed[0].completed_at.is_some());
}
