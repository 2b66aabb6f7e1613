//! Error taxonomy for the admin engine and the remote biometric gateway.
//!
//! Two layers: `AdminError` is what callers of the engine and gateway see;
//! `RemoteErrorCode` classifies remote-call failures as retryable or not so
//! bulk jobs can record a per-item verdict without aborting.

use thiserror::Error;

/// Short machine tags for remote-call failures, mirroring the backend's
/// error vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorCode {
    /// Bearer token rejected by the backend (401/403).
    Unauthenticated,
    /// Template lookup failed on a read path.
    TemplateNotFound,
    /// Backend or transport unreachable.
    ServiceUnavailable,
    /// Per-operation deadline elapsed.
    RequestTimeout,
    /// Backend shed load (429 / resource exhaustion).
    RateLimitExceeded,
    /// Business-level rejection (bad image, wrong encoder version, ...).
    Rejected,
}

impl RemoteErrorCode {
    /// Whether an item that failed with this code may safely be retried later.
    pub fn retryable(self) -> bool {
        match self {
            Self::ServiceUnavailable | Self::RequestTimeout | Self::RateLimitExceeded => true,
            // Auth failures are retryable once the token cache is invalidated;
            // the retry budget itself lives with the caller.
            Self::Unauthenticated => true,
            Self::TemplateNotFound | Self::Rejected => false,
        }
    }

    /// Stable machine tag recorded on job errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the admin engine, gateway, pool, and token provider.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Rejected synchronously at submission; no job is created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad signing key, malformed endpoint, and similar startup failures.
    /// Never retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Status/progress/result/cancel against an id the registry never saw.
    #[error("bulk operation not found: {0}")]
    UnknownOperation(String),

    /// Cancel against an operation that already reached a terminal state.
    #[error("bulk operation {operation_id} is already {status}")]
    NotCancellable {
        /// Operation the cancel targeted.
        operation_id: String,
        /// Terminal state the operation is in.
        status: String,
    },

    /// A remote call failed with the given classification.
    #[error("remote call failed ({code}): {message}")]
    Remote {
        /// Classified failure tag.
        code: RemoteErrorCode,
        /// Human-readable detail from the backend or transport.
        message: String,
    },

    /// Engine-level failure not tied to one item (worker panic, closed queue).
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl AdminError {
    /// Convenience constructor for remote failures.
    pub fn remote(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Retryable classification per the taxonomy: only remote failures with a
    /// retryable code qualify; validation/config/lookup errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { code, .. } => code.retryable(),
            _ => false,
        }
    }

    /// Machine tag recorded on job errors for this failure.
    pub fn code_tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnknownOperation(_) => "OPERATION_NOT_FOUND",
            Self::NotCancellable { .. } => "OPERATION_TERMINAL",
            Self::Remote { code, .. } => code.as_str(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Classify a reqwest transport error into a retryable remote code.
///
/// Connection-level failures and timeouts are transient; anything else that
/// reaches us without an HTTP status is treated as unavailability.
pub fn classify_transport_error(error: &reqwest::Error) -> RemoteErrorCode {
    if error.is_timeout() {
        return RemoteErrorCode::RequestTimeout;
    }
    RemoteErrorCode::ServiceUnavailable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_are_retryable() {
        assert!(RemoteErrorCode::ServiceUnavailable.retryable());
        assert!(RemoteErrorCode::RequestTimeout.retryable());
        assert!(RemoteErrorCode::RateLimitExceeded.retryable());
        assert!(RemoteErrorCode::Unauthenticated.retryable());
    }

    #[test]
    fn business_rejections_are_not_retryable() {
        assert!(!RemoteErrorCode::TemplateNotFound.retryable());
        assert!(!RemoteErrorCode::Rejected.retryable());
    }

    #[test]
    fn validation_and_config_errors_never_retry() {
        assert!(!AdminError::Validation("empty".into()).is_retryable());
        assert!(!AdminError::Configuration("bad key".into()).is_retryable());
        assert!(!AdminError::UnknownOperation("op-1".into()).is_retryable());
    }

    #[test]
    fn remote_error_carries_code_tag() {
        let err = AdminError::remote(RemoteErrorCode::TemplateNotFound, "class 7 missing");
        assert_eq!(err.code_tag(), "TEMPLATE_NOT_FOUND");
        assert!(!err.is_retryable());
    }
}
