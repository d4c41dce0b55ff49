//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, JobforgeError>` so that
//! failures render through the error envelope with the matching status.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use super::{ApiResponse, AppState};
use crate::error::{ErrorCode, JobforgeError, Result};
use crate::jobs::{JobId, JobRecord, QueueName};
use crate::middleware::AuthContext;
use crate::submission::{self, SubmitRequest};

// ═══════════════════════════════════════════════════════════════════════════════
// Health Checks
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Ready once the queue store answers.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready", "broker": "up" })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "broker": "down",
                    "error": e.user_message(),
                })),
            )
        }
    }
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Jobs
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn submit_job(
    State(state): State<AppState>,
    auth: AuthContext,
    body: std::result::Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = body.map_err(|rejection| {
        JobforgeError::new(ErrorCode::InvalidInput, rejection.body_text())
    })?;

    let ack = submission::submit(&state.registry, request).await?;
    tracing::info!(
        job_id = %ack.id,
        queue = %ack.queue_name,
        caller = %auth.user_id,
        "Job submitted"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(ack))))
}

/// Job record as exposed to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub id: JobId,
    pub name: String,
    pub queue_name: String,
    pub data: serde_json::Value,
    pub state: String,
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub priority: u32,
    /// Creation time, epoch milliseconds
    pub timestamp: i64,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    #[serde(rename = "returnvalue")]
    pub return_value: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
}

impl From<JobRecord> for JobDetail {
    fn from(job: JobRecord) -> Self {
        Self {
            id: job.id,
            name: job.name,
            queue_name: job.queue_name,
            data: job.payload,
            state: job.status.as_str().to_string(),
            progress: job.progress,
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
            priority: job.priority,
            timestamp: job.created_at.timestamp_millis(),
            processed_on: job.started_at.map(|t| t.timestamp_millis()),
            finished_on: job.finished_at.map(|t| t.timestamp_millis()),
            return_value: job.result,
            failed_reason: job.failure_reason,
        }
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    let job_id = job_id(&queue, &id)?;
    let job = state.registry.get_job(lane.as_str(), job_id).await?;
    Ok(Json(ApiResponse::success(JobDetail::from(job))))
}

pub async fn delete_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((queue, id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    let job_id = job_id(&queue, &id)?;
    state.registry.remove_job(lane.as_str(), job_id).await?;
    tracing::info!(queue = %lane, job_id = %job_id, caller = %auth.user_id, "Job removed");

    Ok(Json(ApiResponse::success(serde_json::json!({
        "id": job_id,
        "queueName": lane.as_str(),
        "removed": true,
    }))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queues
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn all_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.registry.stats_all().await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn queue_stats(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    let stats = state.registry.stats(lane.as_str()).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "queue": lane.as_str(),
        "stats": stats,
    }))))
}

pub async fn pause_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue): Path<String>,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    state.registry.pause(lane.as_str()).await?;
    tracing::info!(queue = %lane, caller = %auth.user_id, "Queue paused");
    Ok(Json(ApiResponse::success(serde_json::json!({
        "queue": lane.as_str(),
        "paused": true,
    }))))
}

pub async fn resume_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue): Path<String>,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    state.registry.resume(lane.as_str()).await?;
    tracing::info!(queue = %lane, caller = %auth.user_id, "Queue resumed");
    Ok(Json(ApiResponse::success(serde_json::json!({
        "queue": lane.as_str(),
        "paused": false,
    }))))
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    /// Keep jobs finished within this many milliseconds
    #[serde(default)]
    pub grace_ms: Option<u64>,
}

pub async fn purge_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    let request: PurgeRequest = optional_body(&body)?;
    let grace = Duration::from_millis(request.grace_ms.unwrap_or(0));

    let removed = state.registry.purge(lane.as_str(), grace).await?;
    tracing::info!(queue = %lane, removed, caller = %auth.user_id, "Queue purged");

    Ok(Json(ApiResponse::success(serde_json::json!({
        "queue": lane.as_str(),
        "removed": removed,
    }))))
}

#[derive(Debug, Default, Deserialize)]
pub struct DrainRequest {
    #[serde(default)]
    pub include_delayed: bool,
}

pub async fn drain_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let lane = lane(&queue)?;
    let request: DrainRequest = optional_body(&body)?;

    let removed = state
        .registry
        .drain(lane.as_str(), request.include_delayed)
        .await?;
    tracing::info!(queue = %lane, removed, caller = %auth.user_id, "Queue drained");

    Ok(Json(ApiResponse::success(serde_json::json!({
        "queue": lane.as_str(),
        "removed": removed,
    }))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Workers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn worker_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.metrics.snapshots()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Decode an optional JSON body. An empty body means defaults; anything else
/// must parse, whatever the content type.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| JobforgeError::validation(format!("Invalid request body: {}", e)))
}

/// Only the known lanes are reachable over HTTP.
fn lane(queue: &str) -> Result<QueueName> {
    queue.parse()
}

fn job_id(queue: &str, id: &str) -> Result<JobId> {
    id.parse()
        .map_err(|_| JobforgeError::job_not_found(queue, id))
}
