//! Remote biometric gateway: thin authenticated call wrapper over the pool.
//!
//! One method per remote operation. Each call leases a pooled channel,
//! attaches the current bearer token, applies the per-operation deadline,
//! releases the channel with the observed outcome, and maps failures into the
//! local taxonomy. The `BiometricBackend` trait is the seam the bulk engine
//! (and test doubles) program against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::TokenProvider;
use crate::error::{AdminError, RemoteErrorCode, classify_transport_error};
use crate::pool::{CallOutcome, ChannelPool};

/// Encoder version templates are upgraded to.
pub const CURRENT_ENCODER_VERSION: u32 = 3;

/// Per-operation call deadlines.
#[derive(Debug, Clone)]
pub struct OperationDeadlines {
    /// Enrollment is the slowest remote path.
    pub enrollment_secs: u64,
    /// Verification and liveness are latency-sensitive.
    pub verification_secs: u64,
    /// Delete, status, tags, upgrade.
    pub request_secs: u64,
}

impl Default for OperationDeadlines {
    fn default() -> Self {
        Self {
            enrollment_secs: 7,
            verification_secs: 4,
            request_secs: 5,
        }
    }
}

/// A one-time enrollment invitation for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentLink {
    /// User the link was generated for.
    pub user_id: String,
    /// Full URL the user opens to enroll.
    pub enrollment_url: String,
    /// Opaque one-time token embedded in the URL.
    pub token: String,
    /// Instant after which the link is refused.
    pub expires_at: DateTime<Utc>,
}

/// Result of a remote enrollment call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentOutcome {
    /// Template class the images were enrolled into.
    pub class_id: i64,
    /// Whether the backend accepted the enrollment.
    pub enrolled: bool,
    /// Feature vectors now stored for the class.
    pub feature_vectors: u32,
}

/// Result of a remote verification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Template class verified against.
    pub class_id: i64,
    /// Match decision.
    pub verified: bool,
    /// Backend similarity score.
    pub score: f64,
}

/// Template state as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStatus {
    /// Template class id.
    pub class_id: i64,
    /// Whether a usable template exists.
    pub available: bool,
    /// Encoder version the stored template was built with.
    pub encoder_version: u32,
    /// Thumbnails retained for re-encoding.
    pub thumbnails_stored: u32,
    /// Tags currently attached.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Result of a template upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateUpgrade {
    /// Template class id.
    pub class_id: i64,
    /// Encoder version before the upgrade.
    pub previous_version: u32,
    /// Encoder version after the upgrade.
    pub new_version: u32,
}

/// Result of a liveness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessOutcome {
    /// Liveness decision.
    pub live: bool,
    /// Backend liveness score.
    pub score: f64,
}

/// Operations the bulk engine needs from the biometric backend.
#[async_trait]
pub trait BiometricBackend: Send + Sync {
    /// Produce a one-time enrollment link for a user.
    async fn generate_enrollment_link(
        &self,
        user_id: &str,
        validity_hours: u32,
    ) -> Result<EnrollmentLink, AdminError>;

    /// Enroll face images into a template class.
    async fn enroll(
        &self,
        class_id: i64,
        images: Vec<String>,
    ) -> Result<EnrollmentOutcome, AdminError>;

    /// Verify one image against an enrolled template.
    async fn verify(&self, class_id: i64, image: String) -> Result<VerificationOutcome, AdminError>;

    /// Delete a template; deleting an absent template is a success.
    async fn delete_template(&self, class_id: i64) -> Result<(), AdminError>;

    /// Read template state; absent templates are `TEMPLATE_NOT_FOUND`.
    async fn template_status(&self, class_id: i64) -> Result<TemplateStatus, AdminError>;

    /// Re-encode a template with the current encoder version.
    async fn upgrade_template(&self, class_id: i64) -> Result<TemplateUpgrade, AdminError>;

    /// Replace the tag set on a template.
    async fn set_template_tags(&self, class_id: i64, tags: &[String]) -> Result<(), AdminError>;

    /// Run a liveness check over a set of images.
    async fn liveness_check(&self, images: Vec<String>) -> Result<LivenessOutcome, AdminError>;
}

/// Production gateway over the channel pool.
pub struct BiometricGateway {
    pool: Arc<ChannelPool>,
    tokens: Arc<TokenProvider>,
    deadlines: OperationDeadlines,
    enrollment_base_url: String,
}

impl BiometricGateway {
    /// Build the gateway. `enrollment_base_url` is where generated enrollment
    /// links point (the enrollment UI, not the backend).
    pub fn new(
        pool: Arc<ChannelPool>,
        tokens: Arc<TokenProvider>,
        deadlines: OperationDeadlines,
        enrollment_base_url: &str,
    ) -> Self {
        Self {
            pool,
            tokens,
            deadlines,
            enrollment_base_url: enrollment_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One authenticated remote call: lease, token, deadline, release, map.
    ///
    /// Returns `Ok(None)` for a 404 when `not_found_ok` (idempotent deletes);
    /// otherwise 404 maps to `TEMPLATE_NOT_FOUND`. The pool counters are
    /// bumped exactly once per call via `release`.
    async fn call(
        &self,
        operation: &'static str,
        deadline: Duration,
        not_found_ok: bool,
        method: reqwest::Method,
        path: String,
        body: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, AdminError> {
        let handle = self.pool.acquire().await?;

        let token = match self.tokens.get_token().await {
            Ok(token) => token,
            Err(error) => {
                self.pool.release(handle, CallOutcome::Failure);
                return Err(error);
            }
        };

        let url = format!("{}{}", handle.channel().endpoint(), path);
        let mut request = handle
            .channel()
            .http()
            .request(method, &url)
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match tokio::time::timeout(deadline, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                let code = classify_transport_error(&error);
                tracing::warn!(
                    event = "remote.call.transport_error",
                    operation,
                    channel_index = handle.index(),
                    error_class = code.as_str(),
                    error = %error,
                    "remote call failed before a response"
                );
                self.pool.release(handle, CallOutcome::Failure);
                return Err(AdminError::remote(code, error.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    event = "remote.call.deadline_exceeded",
                    operation,
                    channel_index = handle.index(),
                    deadline_secs = deadline.as_secs(),
                    "remote call exceeded its deadline"
                );
                self.pool.release(handle, CallOutcome::Failure);
                return Err(AdminError::remote(
                    RemoteErrorCode::RequestTimeout,
                    format!("{operation} timed out after {}s", deadline.as_secs()),
                ));
            }
        };

        let status = response.status();
        if status.is_success() {
            let value = response.json::<serde_json::Value>().await.unwrap_or_default();
            self.pool.release(handle, CallOutcome::Success);
            return Ok(Some(value));
        }
        if status == reqwest::StatusCode::NOT_FOUND && not_found_ok {
            self.pool.release(handle, CallOutcome::Success);
            return Ok(None);
        }

        let detail = response.text().await.unwrap_or_default();
        let error = map_rejection(operation, status, &detail);
        if matches!(
            &error,
            AdminError::Remote {
                code: RemoteErrorCode::Unauthenticated,
                ..
            }
        ) {
            // Next call re-signs; this one surfaces as retryable.
            self.tokens.invalidate().await;
        }
        tracing::warn!(
            event = "remote.call.rejected",
            operation,
            channel_index = handle.index(),
            status = status.as_u16(),
            error = %error,
            "remote call rejected"
        );
        self.pool.release(handle, CallOutcome::Failure);
        Err(error)
    }

    fn enrollment_deadline(&self) -> Duration {
        Duration::from_secs(self.deadlines.enrollment_secs.max(1))
    }

    fn verification_deadline(&self) -> Duration {
        Duration::from_secs(self.deadlines.verification_secs.max(1))
    }

    fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.deadlines.request_secs.max(1))
    }
}

/// Map a non-success HTTP status into the local taxonomy.
pub fn map_rejection(operation: &str, status: reqwest::StatusCode, detail: &str) -> AdminError {
    let message = if detail.trim().is_empty() {
        format!("{operation} rejected with HTTP {}", status.as_u16())
    } else {
        format!("{operation} rejected with HTTP {}: {detail}", status.as_u16())
    };
    let code = match status.as_u16() {
        401 | 403 => RemoteErrorCode::Unauthenticated,
        404 => RemoteErrorCode::TemplateNotFound,
        408 => RemoteErrorCode::RequestTimeout,
        429 => RemoteErrorCode::RateLimitExceeded,
        500..=599 => RemoteErrorCode::ServiceUnavailable,
        _ => RemoteErrorCode::Rejected,
    };
    AdminError::remote(code, message)
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    operation: &str,
    value: Option<serde_json::Value>,
) -> Result<T, AdminError> {
    let value = value.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|error| {
        AdminError::remote(
            RemoteErrorCode::Rejected,
            format!("{operation} returned an unexpected payload: {error}"),
        )
    })
}

#[async_trait]
impl BiometricBackend for BiometricGateway {
    async fn generate_enrollment_link(
        &self,
        user_id: &str,
        validity_hours: u32,
    ) -> Result<EnrollmentLink, AdminError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AdminError::Validation("user id must be non-empty".to_string()));
        }
        if validity_hours == 0 {
            return Err(AdminError::Validation(
                "link validity must be at least one hour".to_string(),
            ));
        }
        // Links are minted locally; the backend is only involved once the
        // user follows the link and enrolls.
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + chrono::TimeDelta::hours(i64::from(validity_hours));
        let enrollment_url = format!(
            "{}/enroll?user={user_id}&token={token}",
            self.enrollment_base_url
        );
        Ok(EnrollmentLink {
            user_id: user_id.to_string(),
            enrollment_url,
            token,
            expires_at,
        })
    }

    async fn enroll(
        &self,
        class_id: i64,
        images: Vec<String>,
    ) -> Result<EnrollmentOutcome, AdminError> {
        let payload = self
            .call(
                "enroll",
                self.enrollment_deadline(),
                false,
                reqwest::Method::POST,
                "/enroll".to_string(),
                Some(json!({ "class_id": class_id, "images": images })),
            )
            .await?;
        parse_payload("enroll", payload)
    }

    async fn verify(&self, class_id: i64, image: String) -> Result<VerificationOutcome, AdminError> {
        let payload = self
            .call(
                "verify",
                self.verification_deadline(),
                false,
                reqwest::Method::POST,
                "/verify".to_string(),
                Some(json!({ "class_id": class_id, "image": image })),
            )
            .await?;
        parse_payload("verify", payload)
    }

    async fn delete_template(&self, class_id: i64) -> Result<(), AdminError> {
        // not_found_ok: deleting an absent template is idempotent success.
        self.call(
            "delete_template",
            self.request_deadline(),
            true,
            reqwest::Method::DELETE,
            format!("/templates/{class_id}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn template_status(&self, class_id: i64) -> Result<TemplateStatus, AdminError> {
        let payload = self
            .call(
                "template_status",
                self.request_deadline(),
                false,
                reqwest::Method::GET,
                format!("/templates/{class_id}/status"),
                None,
            )
            .await?;
        parse_payload("template_status", payload)
    }

    async fn upgrade_template(&self, class_id: i64) -> Result<TemplateUpgrade, AdminError> {
        // Upgrade eligibility is decided here from the status response, never
        // from caller context.
        let status = self.template_status(class_id).await?;
        if !status.available {
            return Err(AdminError::remote(
                RemoteErrorCode::Rejected,
                format!("template {class_id} is not available for upgrade"),
            ));
        }
        if status.encoder_version >= CURRENT_ENCODER_VERSION {
            return Err(AdminError::remote(
                RemoteErrorCode::Rejected,
                format!(
                    "template {class_id} already at encoder version {}",
                    status.encoder_version
                ),
            ));
        }
        if status.thumbnails_stored == 0 {
            return Err(AdminError::remote(
                RemoteErrorCode::Rejected,
                format!("template {class_id} has no thumbnails stored for re-encoding"),
            ));
        }

        self.call(
            "upgrade_template",
            self.request_deadline(),
            false,
            reqwest::Method::POST,
            format!("/templates/{class_id}/upgrade"),
            Some(json!({ "target_version": CURRENT_ENCODER_VERSION })),
        )
        .await?;
        Ok(TemplateUpgrade {
            class_id,
            previous_version: status.encoder_version,
            new_version: CURRENT_ENCODER_VERSION,
        })
    }

    async fn set_template_tags(&self, class_id: i64, tags: &[String]) -> Result<(), AdminError> {
        self.call(
            "set_template_tags",
            self.request_deadline(),
            false,
            reqwest::Method::PUT,
            format!("/templates/{class_id}/tags"),
            Some(json!({ "tags": tags })),
        )
        .await?;
        Ok(())
    }

    async fn liveness_check(&self, images: Vec<String>) -> Result<LivenessOutcome, AdminError> {
        let payload = self
            .call(
                "liveness_check",
                self.verification_deadline(),
                false,
                reqwest::Method::POST,
                "/livenessdetection".to_string(),
                Some(json!({ "images": images })),
            )
            .await?;
        parse_payload("liveness_check", payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_auth_code() {
        let error = map_rejection("verify", reqwest::StatusCode::UNAUTHORIZED, "bad token");
        match error {
            AdminError::Remote { code, .. } => assert_eq!(code, RemoteErrorCode::Unauthenticated),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn not_found_maps_to_template_not_found() {
        let error = map_rejection("template_status", reqwest::StatusCode::NOT_FOUND, "");
        match error {
            AdminError::Remote { code, .. } => {
                assert_eq!(code, RemoteErrorCode::TemplateNotFound);
                assert!(!code.retryable());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        let error = map_rejection("enroll", reqwest::StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(error.is_retryable());
        let error = map_rejection("enroll", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(error.is_retryable());
    }

    #[test]
    fn other_client_errors_are_rejections() {
        let error = map_rejection("enroll", reqwest::StatusCode::UNPROCESSABLE_ENTITY, "bad image");
        match error {
            AdminError::Remote { code, .. } => {
                assert_eq!(code, RemoteErrorCode::Rejected);
                assert!(!code.retryable());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
