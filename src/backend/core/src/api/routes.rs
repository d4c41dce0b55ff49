//! Route table.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::{handlers, AppState};
use crate::middleware::{RateLimitLayer, RateLimiter};

/// Build the route table.
///
/// # Endpoints
///
/// ## Public
/// - `GET /health`, `GET /health/live`, `GET /health/ready`
/// - `GET /metrics` - Prometheus text format
///
/// ## Admin
/// - `POST /api/jobs` - Submit a job (rate limited per caller)
/// - `GET /api/jobs/:queue/:id` - Job detail
/// - `DELETE /api/jobs/:queue/:id` - Remove a job that is not running
/// - `GET /api/stats` - Counts for every lane
/// - `GET /api/queues/:queue/stats`
/// - `POST /api/queues/:queue/{pause,resume,purge,drain}`
/// - `GET /api/workers/metrics` - Per-worker counters
pub fn router(submission_limiter: Arc<RateLimiter>) -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route(
            "/api/jobs",
            post(handlers::submit_job).route_layer(RateLimitLayer::new(submission_limiter)),
        )
        .route(
            "/api/jobs/:queue/:id",
            get(handlers::get_job).delete(handlers::delete_job),
        )
        .route("/api/stats", get(handlers::all_stats))
        .route("/api/queues/:queue/stats", get(handlers::queue_stats))
        .route("/api/queues/:queue/pause", post(handlers::pause_queue))
        .route("/api/queues/:queue/resume", post(handlers::resume_queue))
        .route("/api/queues/:queue/purge", post(handlers::purge_queue))
        .route("/api/queues/:queue/drain", post(handlers::drain_queue))
        .route("/api/workers/metrics", get(handlers::worker_metrics))
}
