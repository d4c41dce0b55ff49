//! HTTP API for Jobforge.
//!
//! Public health endpoints (`/health*`, `/metrics`) sit next to the admin surface under
//! `/api`. Every `/api` route requires an admin caller, and job submission is
//! additionally rate limited per caller.

mod handlers;
pub mod routes;

use axum::{
    error_handling::HandleErrorLayer,
    http::{HeaderValue, Method},
    response::{IntoResponse, Response},
    BoxError, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::{ErrorCode, JobforgeError};
use crate::jobs::{MetricsRegistry, QueueRegistry};
use crate::middleware::{AuthLayer, Authenticator, RateLimiter};

pub use handlers::JobDetail;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<QueueRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub authenticator: Arc<Authenticator>,
    pub submission_limiter: Arc<RateLimiter>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        registry: Arc<QueueRegistry>,
        metrics: Arc<MetricsRegistry>,
        authenticator: Arc<Authenticator>,
        submission_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            metrics,
            authenticator,
            submission_limiter,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(registry, metrics, authenticator, limiter);
/// let app = build_router(state, &config.server);
/// ```
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let auth = AuthLayer::new(state.authenticator.clone());
    let timeout = server.request_timeout;

    routes::router(state.submission_limiter.clone())
        .layer(auth)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(timeout),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

async fn handle_middleware_error(error: BoxError) -> Response {
    if error.is::<tower::timeout::error::Elapsed>() {
        return JobforgeError::new(ErrorCode::Timeout, "Request timed out").into_response();
    }
    JobforgeError::internal(format!("Unhandled middleware error: {}", error)).into_response()
}

/// API response wrapper.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_error_serialization() {
        let response: ApiResponse<()> = ApiResponse::error_with_code("broker down", "BROKER_UNAVAILABLE");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "BROKER_UNAVAILABLE");
        assert!(json.get("data").is_none());
    }
}
