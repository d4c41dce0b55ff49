//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.
//!
//! Tests cover:
//! - Public health endpoints
//! - Admin authentication (missing credentials, non-admin, JWT, API key)
//! - Submission validation and acknowledgement
//! - Submission rate limiting
//! - Job detail, delete and queue controls (including malformed bodies)
//! - Worker metrics

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use fake::{faker::internet::en::SafeEmail, Fake};
use jobforge_core::api::{build_router, AppState};
use jobforge_core::config::ServerConfig;
use jobforge_core::jobs::{
    InMemoryQueueFactory, JobOptions, JobStatus, MetricsRegistry, QueueRegistry, QueueSettings,
};
use jobforge_core::middleware::{
    hash_api_key, ApiKeyEntry, AuthConfig, Authenticator, Claims, RateLimitConfig, RateLimiter,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_KEY: &str = "admin-test-key";
const VIEWER_KEY: &str = "viewer-test-key";
const SECRET: &str = "api-test-secret";

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    registry: Arc<QueueRegistry>,
    metrics: Arc<MetricsRegistry>,
    authenticator: Arc<Authenticator>,
    app: Router,
}

fn harness_with_limit(max_requests: u64) -> Harness {
    let registry = Arc::new(QueueRegistry::new(
        Arc::new(InMemoryQueueFactory),
        QueueSettings::default(),
    ));
    let metrics = Arc::new(MetricsRegistry::new());
    let authenticator = Arc::new(
        Authenticator::new(AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            api_keys: vec![
                ApiKeyEntry {
                    name: "ops".to_string(),
                    key_sha256: hash_api_key(ADMIN_KEY),
                    roles: vec!["admin".to_string()],
                },
                ApiKeyEntry {
                    name: "support".to_string(),
                    key_sha256: hash_api_key(VIEWER_KEY),
                    roles: vec!["viewer".to_string()],
                },
            ],
            ..AuthConfig::default()
        })
        .unwrap(),
    );
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        max_requests,
        ..RateLimitConfig::default()
    }));

    let state = AppState::new(registry.clone(), metrics.clone(), authenticator.clone(), limiter);
    let app = build_router(state, &ServerConfig::default());
    Harness {
        registry,
        metrics,
        authenticator,
        app,
    }
}

fn harness() -> Harness {
    harness_with_limit(20)
}

fn admin(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    request(method, uri, body, Some(ADMIN_KEY))
}

fn request(method: Method, uri: &str, body: Option<Value>, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.7");
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn email_submission() -> Value {
    let to: String = SafeEmail().fake();
    json!({
        "type": "email",
        "payload": {"to": to, "template": "WELCOME", "data": {"name": "Ada"}},
        "options": {"priority": 3}
    })
}

// ============================================================================
// Public Health Endpoints
// ============================================================================

#[tokio::test]
async fn test_health_endpoints_are_public() {
    let h = harness();
    for uri in ["/health", "/health/live", "/health/ready"] {
        let (status, _) = send(&h.app, request(Method::GET, uri, None, None)).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
    }

    let (_, body) = send(&h.app, request(Method::GET, "/health/ready", None, None)).await;
    assert_eq!(body["broker"], "up");
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(request(Method::GET, "/metrics", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_credentials_rejected_before_admission() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        request(Method::POST, "/api/jobs", Some(email_submission()), None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(h.registry.stats("email").await.unwrap().total, 0);
}

#[tokio::test]
async fn test_non_admin_forbidden() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        request(Method::POST, "/api/queues/email/pause", None, Some(VIEWER_KEY)),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert!(!h.registry.stats("email").await.unwrap().paused);
}

#[tokio::test]
async fn test_admin_jwt_accepted() {
    let h = harness();
    let token = h
        .authenticator
        .generate_token(&Claims::new("ops-1", vec!["admin".to_string()], chrono::Duration::hours(1)))
        .unwrap();

    let request = Request::builder()
        .uri("/api/stats")
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["email"].is_object());
    assert!(body["data"]["pdf"].is_object());
}

#[tokio::test]
async fn test_expired_jwt_rejected() {
    let h = harness();
    let token = h
        .authenticator
        .generate_token(&Claims::new("ops-1", vec!["admin".to_string()], chrono::Duration::hours(-2)))
        .unwrap();

    let request = Request::builder()
        .uri("/api/stats")
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn test_submit_email_returns_created() {
    let h = harness();
    let (status, body) = send(&h.app, admin(Method::POST, "/api/jobs", Some(email_submission()))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "send-email");
    assert_eq!(body["data"]["queueName"], "email");
    assert!(body["data"]["timestamp"].as_i64().unwrap() > 0);

    let id = body["data"]["id"].as_str().unwrap().parse().unwrap();
    let job = h.registry.get_job("email", id).await.unwrap();
    assert_eq!(job.priority, 3);
    assert_eq!(job.status, JobStatus::Waiting);
}

#[tokio::test]
async fn test_submit_pdf_with_delay_is_delayed() {
    let h = harness();
    let submission = json!({
        "type": "pdf",
        "payload": {"type": "invoice", "documentId": uuid::Uuid::new_v4().to_string()},
        "options": {"delay": 60000}
    });
    let (status, body) = send(&h.app, admin(Method::POST, "/api/jobs", Some(submission))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "generate-pdf");
    assert_eq!(h.registry.stats("pdf").await.unwrap().delayed, 1);
}

#[tokio::test]
async fn test_priority_out_of_range_creates_no_job() {
    let h = harness();
    let mut submission = email_submission();
    submission["options"]["priority"] = json!(11);

    let (status, body) = send(&h.app, admin(Method::POST, "/api/jobs", Some(submission))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["fields"]["options.priority"].is_array());
    assert_eq!(h.registry.stats("email").await.unwrap().total, 0);
}

#[tokio::test]
async fn test_every_bad_field_reported() {
    let h = harness();
    let submission = json!({
        "type": "email",
        "payload": {"to": ["ok@example.com", "nope"], "template": "BIRTHDAY"},
        "options": {"attempts": 9}
    });
    let (status, body) = send(&h.app, admin(Method::POST, "/api/jobs", Some(submission))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields = body["error"]["details"]["fields"].as_object().unwrap();
    assert!(fields.contains_key("payload.to[1]"));
    assert!(fields.contains_key("payload.template"));
    assert!(fields.contains_key("options.attempts"));
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let h = harness();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/jobs")
        .header("X-API-Key", ADMIN_KEY)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_submission_rate_limited_per_caller() {
    let h = harness_with_limit(2);
    for _ in 0..2 {
        let (status, _) = send(&h.app, admin(Method::POST, "/api/jobs", Some(email_submission()))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let response = h
        .app
        .clone()
        .oneshot(admin(Method::POST, "/api/jobs", Some(email_submission())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(h.registry.stats("email").await.unwrap().total, 2);

    // Reads are not counted against the submission budget.
    let (status, _) = send(&h.app, admin(Method::GET, "/api/stats", None)).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Jobs and Queues
// ============================================================================

#[tokio::test]
async fn test_job_detail_shape() {
    let h = harness();
    let job = h
        .registry
        .add_job("email", "send-email", json!({"to": "a@example.com"}), JobOptions::default())
        .await
        .unwrap();

    let (status, body) = send(&h.app, admin(Method::GET, &format!("/api/jobs/email/{}", job.id), None)).await;
    assert_eq!(status, StatusCode::OK);

    let detail = &body["data"];
    assert_eq!(detail["id"], job.id.to_string());
    assert_eq!(detail["state"], "waiting");
    assert_eq!(detail["attemptsMade"], 0);
    assert_eq!(detail["data"]["to"], "a@example.com");
    assert!(detail["processedOn"].is_null());
    assert!(detail["returnvalue"].is_null());
}

#[tokio::test]
async fn test_unknown_job_and_queue_not_found() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        admin(Method::GET, &format!("/api/jobs/email/{}", uuid::Uuid::new_v4()), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "JOB_NOT_FOUND");

    let (status, body) = send(&h.app, admin(Method::GET, "/api/queues/sms/stats", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "QUEUE_NOT_FOUND");
}

#[tokio::test]
async fn test_delete_active_job_conflicts() {
    let h = harness();
    let job = h
        .registry
        .add_job("pdf", "generate-pdf", json!({}), JobOptions::default())
        .await
        .unwrap();
    h.registry
        .queue("pdf")
        .claim_next("w1", Duration::from_secs(30))
        .await
        .unwrap();

    let uri = format!("/api/jobs/pdf/{}", job.id);
    let (status, body) = send(&h.app, admin(Method::DELETE, &uri, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "JOB_BUSY");

    let waiting = h
        .registry
        .add_job("pdf", "generate-pdf", json!({}), JobOptions::default())
        .await
        .unwrap();
    let (status, _) = send(&h.app, admin(Method::DELETE, &format!("/api/jobs/pdf/{}", waiting.id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.registry.get_job("pdf", waiting.id).await.is_err());
}

#[tokio::test]
async fn test_pause_resume_round_trip() {
    let h = harness();
    let (status, body) = send(&h.app, admin(Method::POST, "/api/queues/email/pause", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paused"], true);

    let (_, body) = send(&h.app, admin(Method::GET, "/api/queues/email/stats", None)).await;
    assert_eq!(body["data"]["stats"]["paused"], true);

    send(&h.app, admin(Method::POST, "/api/queues/email/resume", None)).await;
    assert!(!h.registry.stats("email").await.unwrap().paused);
}

#[tokio::test]
async fn test_purge_defaults_to_no_grace() {
    let h = harness();
    completed_jobs(&h, 2).await;

    let (status, body) = send(
        &h.app,
        admin(Method::POST, "/api/queues/email/purge", Some(json!({"grace_ms": 3_600_000}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 0);

    let (_, body) = send(&h.app, admin(Method::POST, "/api/queues/email/purge", None)).await;
    assert_eq!(body["data"]["removed"], 2);
    assert_eq!(h.registry.stats("email").await.unwrap().completed, 0);
}

#[tokio::test]
async fn test_drain_optionally_includes_delayed() {
    let h = harness();
    h.registry
        .add_job("email", "send-email", json!({}), JobOptions::default())
        .await
        .unwrap();
    h.registry
        .add_job(
            "email",
            "send-email",
            json!({}),
            JobOptions::new().with_delay(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    let (_, body) = send(&h.app, admin(Method::POST, "/api/queues/email/drain", None)).await;
    assert_eq!(body["data"]["removed"], 1);

    let (_, body) = send(
        &h.app,
        admin(Method::POST, "/api/queues/email/drain", Some(json!({"include_delayed": true}))),
    )
    .await;
    assert_eq!(body["data"]["removed"], 1);
    assert_eq!(h.registry.stats("email").await.unwrap().total, 0);
}

async fn completed_jobs(h: &Harness, count: usize) {
    let queue = h.registry.queue("email");
    for _ in 0..count {
        let job = h
            .registry
            .add_job("email", "send-email", json!({}), JobOptions::default())
            .await
            .unwrap();
        queue.claim_next("w1", Duration::from_secs(30)).await.unwrap();
        queue.complete(job.id, "w1", json!(null)).await.unwrap();
    }
}

#[tokio::test]
async fn test_purge_malformed_body_rejected() {
    let h = harness();
    completed_jobs(&h, 2).await;

    let (status, body) = send(
        &h.app,
        admin(Method::POST, "/api/queues/email/purge", Some(json!({"grace_ms": "3600000"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(h.registry.stats("email").await.unwrap().completed, 2);

    let truncated = Request::builder()
        .method(Method::POST)
        .uri("/api/queues/email/purge")
        .header("X-API-Key", ADMIN_KEY)
        .header("content-type", "application/json")
        .body(Body::from("{\"grace_ms\": 36"))
        .unwrap();
    let (status, _) = send(&h.app, truncated).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(h.registry.stats("email").await.unwrap().completed, 2);
}

#[tokio::test]
async fn test_purge_body_without_content_type_is_honored() {
    let h = harness();
    completed_jobs(&h, 2).await;

    let bare = Request::builder()
        .method(Method::POST)
        .uri("/api/queues/email/purge")
        .header("X-API-Key", ADMIN_KEY)
        .body(Body::from(json!({"grace_ms": 3_600_000}).to_string()))
        .unwrap();
    let (status, body) = send(&h.app, bare).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 0);
    assert_eq!(h.registry.stats("email").await.unwrap().completed, 2);
}

#[tokio::test]
async fn test_drain_malformed_body_rejected() {
    let h = harness();
    h.registry
        .add_job("email", "send-email", json!({}), JobOptions::default())
        .await
        .unwrap();

    let (status, body) = send(
        &h.app,
        admin(Method::POST, "/api/queues/email/drain", Some(json!({"include_delayed": "yes"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(h.registry.stats("email").await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_worker_metrics_snapshots() {
    let h = harness();
    let collector = h.metrics.collector("email-worker");
    collector.record_success(Duration::from_millis(40));
    collector.record_failure(Duration::from_millis(60));

    let (status, body) = send(&h.app, admin(Method::GET, "/api/workers/metrics", None)).await;
    assert_eq!(status, StatusCode::OK);

    let snapshot = &body["data"][0];
    assert_eq!(snapshot["worker"], "email-worker");
    assert_eq!(snapshot["total_processed"], 2);
    assert_eq!(snapshot["success_rate"], "50.00%");
    assert_eq!(snapshot["avg_processing_time_ms"], 50);
}
