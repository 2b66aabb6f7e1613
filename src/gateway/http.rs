//! Administrative HTTP surface over the bulk engine.
//!
//! Submission endpoints validate fail-fast (400), hand the job to the engine,
//! and return the operation id immediately. Inspection endpoints read the job
//! registry; `/health` reports pool metrics alongside job counts.

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::error::AdminError;
use crate::jobs::{BulkEngine, JobDetail, JobProgress, JobStatus, JobSummary};
use crate::pool::{ChannelPool, PoolMetricsSnapshot};

/// Shared state for the admin server.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<BulkEngine>,
    pub pool: Arc<ChannelPool>,
    /// Validity applied when a link request does not carry its own.
    pub default_link_validity_hours: u32,
}

/// Request body for POST /operations/enrollment-links.
#[derive(Debug, Deserialize)]
pub struct EnrollmentLinksRequest {
    /// Users to generate one link each for.
    pub user_ids: Vec<String>,
    /// Overrides the configured default validity.
    pub validity_hours: Option<u32>,
}

/// Request body for template delete and upgrade submissions.
#[derive(Debug, Deserialize)]
pub struct TemplateIdsRequest {
    /// Template classes to operate on.
    pub class_ids: Vec<i64>,
    /// Free-form audit note; logged, not stored.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for POST /operations/template-tags.
#[derive(Debug, Deserialize)]
pub struct TemplateTagsRequest {
    /// Template classes to re-tag.
    pub class_ids: Vec<i64>,
    /// Replacement tag set; empty clears tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Response body for every submission endpoint.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// Id to poll status, progress, and result with.
    pub operation_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub operation_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pool: PoolMetricsSnapshot,
    pub pool_healthy: bool,
    pub active_operations: usize,
    pub completed_operations: usize,
}

fn error_response(error: AdminError) -> (StatusCode, String) {
    let status = match &error {
        AdminError::Validation(_) => StatusCode::BAD_REQUEST,
        AdminError::UnknownOperation(_) => StatusCode::NOT_FOUND,
        AdminError::NotCancellable { .. } => StatusCode::CONFLICT,
        AdminError::Remote { .. } => StatusCode::BAD_GATEWAY,
        AdminError::Configuration(_) | AdminError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

async fn handle_enrollment_links(
    State(state): State<GatewayState>,
    Json(body): Json<EnrollmentLinksRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let validity = body
        .validity_hours
        .unwrap_or(state.default_link_validity_hours);
    let operation_id = state
        .engine
        .submit_link_generation(body.user_ids, validity)
        .await
        .map_err(error_response)?;
    Ok(Json(SubmitResponse { operation_id }))
}

async fn handle_template_deletes(
    State(state): State<GatewayState>,
    Json(body): Json<TemplateIdsRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let operation_id = state
        .engine
        .submit_template_delete(body.class_ids)
        .await
        .map_err(error_response)?;
    if let Some(reason) = body.reason.as_deref() {
        tracing::info!(operation_id = %operation_id, reason, "template delete reason");
    }
    Ok(Json(SubmitResponse { operation_id }))
}

async fn handle_template_upgrades(
    State(state): State<GatewayState>,
    Json(body): Json<TemplateIdsRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let operation_id = state
        .engine
        .submit_template_upgrade(body.class_ids)
        .await
        .map_err(error_response)?;
    Ok(Json(SubmitResponse { operation_id }))
}

async fn handle_template_tags(
    State(state): State<GatewayState>,
    Json(body): Json<TemplateTagsRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let operation_id = state
        .engine
        .submit_template_tag(body.class_ids, body.tags)
        .await
        .map_err(error_response)?;
    Ok(Json(SubmitResponse { operation_id }))
}

async fn handle_status(
    State(state): State<GatewayState>,
    Path(operation_id): Path<String>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let status = state
        .engine
        .registry()
        .status(&operation_id)
        .await
        .map_err(error_response)?;
    Ok(Json(StatusResponse {
        operation_id,
        status,
    }))
}

async fn handle_progress(
    State(state): State<GatewayState>,
    Path(operation_id): Path<String>,
) -> Result<Json<JobProgress>, (StatusCode, String)> {
    let progress = state
        .engine
        .registry()
        .progress(&operation_id)
        .await
        .map_err(error_response)?;
    Ok(Json(progress))
}

async fn handle_result(
    State(state): State<GatewayState>,
    Path(operation_id): Path<String>,
) -> Result<Json<JobDetail>, (StatusCode, String)> {
    let detail = state
        .engine
        .registry()
        .detail(&operation_id)
        .await
        .map_err(error_response)?;
    Ok(Json(detail))
}

async fn handle_cancel(
    State(state): State<GatewayState>,
    Path(operation_id): Path<String>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    state
        .engine
        .registry()
        .request_cancel(&operation_id)
        .await
        .map_err(error_response)?;
    let status = state
        .engine
        .registry()
        .status(&operation_id)
        .await
        .map_err(error_response)?;
    Ok(Json(StatusResponse {
        operation_id,
        status,
    }))
}

async fn handle_active(State(state): State<GatewayState>) -> Json<Vec<JobSummary>> {
    Json(state.engine.registry().list_active().await)
}

async fn handle_completed(State(state): State<GatewayState>) -> Json<Vec<JobSummary>> {
    Json(state.engine.registry().list_completed().await)
}

async fn handle_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let active = state.engine.registry().list_active().await.len();
    let completed = state.engine.registry().list_completed().await.len();
    Json(HealthResponse {
        status: "healthy",
        pool: state.pool.metrics(),
        pool_healthy: state.pool.is_healthy(),
        active_operations: active,
        completed_operations: completed,
    })
}

/// Build the admin router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/operations/enrollment-links", post(handle_enrollment_links))
        .route("/operations/template-deletes", post(handle_template_deletes))
        .route(
            "/operations/template-upgrades",
            post(handle_template_upgrades),
        )
        .route("/operations/template-tags", post(handle_template_tags))
        .route("/operations/active", get(handle_active))
        .route("/operations/completed", get(handle_completed))
        .route("/operations/{operation_id}/status", get(handle_status))
        .route("/operations/{operation_id}/progress", get(handle_progress))
        .route("/operations/{operation_id}/result", get(handle_result))
        .route("/operations/{operation_id}/cancel", post(handle_cancel))
        .with_state(state)
}

/// Run the admin server; binds to `bind_addr` (e.g. `127.0.0.1:8088`).
/// Graceful shutdown on Ctrl+C (SIGINT) and SIGTERM (Unix); in-flight
/// requests complete before exit.
pub async fn run_http(state: GatewayState, bind_addr: &str) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("admin gateway listening on {bind_addr} (Ctrl+C/SIGTERM to stop)");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("admin gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
    }
}
