//! Per-caller submission rate limiting.
//!
//! Counts requests per caller in fixed windows and rejects the excess with
//! `429 Too Many Requests` before the handler runs. The caller is identified
//! by the first trusted proxy header that carries a value (by default
//! `x-forwarded-for`, then `x-real-ip`), then the socket address, and
//! finally falls back to a shared `anonymous` bucket.
//!
//! This limits how fast jobs are *admitted*; how fast they are *processed*
//! is the worker's claim limiter.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobforge_core::middleware::{RateLimitConfig, RateLimitLayer, RateLimiter};
//!
//! let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
//! let app = Router::new()
//!     .route("/api/jobs", post(submit_job).route_layer(RateLimitLayer::new(limiter)));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::JobforgeError;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Submission rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Requests allowed per caller per window
    pub max_requests: u64,

    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Headers consulted, in order, for the caller's address
    pub trusted_proxy_headers: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 20,
            window: Duration::from_secs(60),
            trusted_proxy_headers: vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()],
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Window State
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed window counter.
#[derive(Debug, Clone)]
struct WindowEntry {
    count: u64,
    window_start: Instant,
    window_duration: Duration,
}

impl WindowEntry {
    fn new(window_duration: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_duration,
        }
    }

    /// Count one request and return the count in the current window.
    fn increment(&mut self, now: Instant) -> u64 {
        if now.duration_since(self.window_start) >= self.window_duration {
            self.count = 0;
            self.window_start = now;
        }
        self.count += 1;
        self.count
    }

    fn remaining_window(&self, now: Instant) -> Duration {
        self.window_duration
            .saturating_sub(now.duration_since(self.window_start))
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window_duration
    }
}

/// Outcome of one rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Set when the request is rejected.
    pub retry_after_secs: Option<u64>,
}

/// Process-local limiter keyed by caller.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Mutex<WindowEntry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request from `caller`.
    pub fn check(&self, caller: &str) -> RateLimitResult {
        let limit = self.config.max_requests;
        if !self.config.enabled {
            return RateLimitResult {
                allowed: true,
                limit,
                remaining: limit,
                reset_at: Utc::now(),
                retry_after_secs: None,
            };
        }

        let now = Instant::now();
        let entry = self
            .windows
            .entry(caller.to_string())
            .or_insert_with(|| Mutex::new(WindowEntry::new(self.config.window, now)));
        let mut window = entry.lock();
        let count = window.increment(now);
        let reset_in = window.remaining_window(now);

        let allowed = count <= limit;
        let reset_at = Utc::now()
            + chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
        let retry_after_secs = if allowed {
            None
        } else {
            Some(reset_in.as_secs_f64().ceil().max(1.0) as u64)
        };

        RateLimitResult {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at,
            retry_after_secs,
        }
    }

    /// Drop windows that have run out.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, entry| !entry.lock().is_expired(now));
    }

    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Caller Extraction
// ═══════════════════════════════════════════════════════════════════════════════

/// Identify the caller of a request.
pub fn extract_caller(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &RateLimitConfig,
) -> String {
    for header_name in &config.trusted_proxy_headers {
        if let Some(value) = headers.get(header_name.as_str()).and_then(|v| v.to_str().ok()) {
            // X-Forwarded-For can contain multiple IPs, take the first (client)
            let first = value.split(',').next().unwrap_or(value).trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let remote_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0);
            let caller = extract_caller(request.headers(), remote_addr, limiter.config());
            let result = limiter.check(&caller);

            if !result.allowed {
                counter!("jobforge_rate_limited_total", "scope" => "submission").increment(1);
                warn!(caller = %caller, limit = result.limit, "Submission rate limit exceeded");
                let retry_after = result.retry_after_secs.unwrap_or(1);
                let mut response = JobforgeError::rate_limited(retry_after).into_response();
                insert_headers(response.headers_mut(), &result);
                return Ok(response);
            }

            debug!(caller = %caller, remaining = result.remaining, "Submission allowed");
            let mut response = inner.call(request).await?;
            insert_headers(response.headers_mut(), &result);
            Ok(response)
        })
    }
}

fn insert_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    let values = [
        ("x-ratelimit-limit", result.limit.to_string()),
        ("x-ratelimit-remaining", result.remaining.to_string()),
        ("x-ratelimit-reset", result.reset_at.timestamp().to_string()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Periodically drop expired windows.
pub fn start_cleanup_task(limiter: Arc<RateLimiter>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        loop {
            interval_timer.tick().await;
            limiter.cleanup_expired();
            debug!("Cleaned up expired rate limit windows");
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
