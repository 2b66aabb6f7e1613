//! Administrative bulk operations for a remote face verification backend.
//!
//! Wires a JWT token provider and a bounded channel pool into a biometric
//! gateway, then runs asynchronous bulk jobs (enrollment links, template
//! deletes, upgrades, and tag replacement) behind an admin HTTP surface.

#![allow(missing_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod pool;
pub mod remote;

pub use auth::TokenProvider;
pub use config::{AppConfig, RuntimeSettings, load_runtime_settings, set_config_home_override};
pub use error::{AdminError, RemoteErrorCode};
pub use gateway::{GatewayState, router, run_http};
pub use jobs::{
    BulkEngine, BulkEngineConfig, BulkKind, ItemSuccess, JobDetail, JobError, JobProgress,
    JobRegistry, JobStatus, JobSummary,
};
pub use pool::{ChannelPool, PoolConfig, PoolMetricsSnapshot};
pub use remote::{
    BiometricBackend, BiometricGateway, CURRENT_ENCODER_VERSION, EnrollmentLink, EnrollmentOutcome,
    LivenessOutcome, OperationDeadlines, TemplateStatus, TemplateUpgrade, VerificationOutcome,
};
