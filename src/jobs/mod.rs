//! Bulk job subsystem: model, registry, and the execution engine.

pub mod engine;
pub mod registry;
pub mod types;

pub use engine::BulkEngine;
pub use registry::JobRegistry;
pub use types::{
    BulkEngineConfig, BulkKind, ItemSuccess, JobDetail, JobError, JobProgress, JobStatus,
    JobSummary,
};
