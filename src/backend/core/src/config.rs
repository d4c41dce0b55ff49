//! Configuration management.
//!
//! Loaded once at startup from `JOBFORGE__*` environment variables (nesting
//! separator `__`), optionally layered over a file, then validated.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{JobforgeError, Result};
use crate::jobs::{BackoffPolicy, QueueSettings, RateLimit, WorkerConfig};
use crate::middleware::{AuthConfig, RateLimitConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    /// Per-caller submission limit
    #[serde(default)]
    pub submission: RateLimitConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub renderer: RendererConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Applied when the URL carries no password
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            password: None,
        }
    }
}

impl RedisConfig {
    /// Connection URL with the configured password spliced in.
    pub fn connection_url(&self) -> String {
        let password = match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(p) => p,
            None => return self.url.clone(),
        };
        match self.url.split_once("://") {
            Some((scheme, rest)) if !rest.contains('@') => format!("{}://:{}@{}", scheme, password, rest),
            _ => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_backend")]
    pub backend: QueueBackendKind,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff")]
    pub backoff: BackoffPolicy,

    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,

    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,

    #[serde(default = "default_lock_duration", with = "humantime_serde")]
    pub lock_duration: Duration,

    #[serde(default = "default_stalled_interval", with = "humantime_serde")]
    pub stalled_interval: Duration,

    /// Grace applied by scheduled purges
    #[serde(default = "default_purge_grace", with = "humantime_serde")]
    pub purge_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
            lock_duration: default_lock_duration(),
            stalled_interval: default_stalled_interval(),
            purge_grace: default_purge_grace(),
        }
    }
}

impl QueueConfig {
    /// Settings applied to each queue at creation.
    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
            ..QueueSettings::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_email_rate_limit")]
    pub email_rate_limit: RateLimit,

    #[serde(default = "default_pdf_rate_limit")]
    pub pdf_rate_limit: RateLimit,

    #[serde(default = "default_claim_backoff", with = "humantime_serde")]
    pub claim_backoff: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            email_rate_limit: default_email_rate_limit(),
            pdf_rate_limit: default_pdf_rate_limit(),
            claim_backoff: default_claim_backoff(),
            poll_interval: default_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl WorkersConfig {
    /// Worker configuration for one lane.
    pub fn worker(&self, name: &str, rate_limit: RateLimit, queue: &QueueConfig) -> WorkerConfig {
        WorkerConfig {
            claim_backoff: self.claim_backoff,
            ..WorkerConfig::new(name)
        }
        .with_concurrency(self.concurrency)
        .with_rate_limit(rate_limit)
        .with_lock_duration(queue.lock_duration)
        .with_stalled_interval(queue.stalled_interval)
        .with_poll_interval(self.poll_interval)
        .with_shutdown_timeout(self.shutdown_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    Http,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_provider")]
    pub provider: MailProvider,

    #[serde(default = "default_mail_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_sender")]
    pub from: String,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: default_mail_provider(),
            endpoint: default_mail_endpoint(),
            api_key: None,
            from: default_sender(),
            timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_render_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: default_render_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Install the Prometheus recorder for `/metrics`
    #[serde(default = "default_true")]
    pub prometheus: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: true,
            prometheus: true,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> Duration { Duration::from_secs(30) }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_key_prefix() -> String { "jobforge".to_string() }
fn default_backend() -> QueueBackendKind { QueueBackendKind::Redis }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff() -> BackoffPolicy { BackoffPolicy::exponential(Duration::from_millis(2000)) }
fn default_keep_completed() -> usize { 100 }
fn default_keep_failed() -> usize { 500 }
fn default_lock_duration() -> Duration { Duration::from_secs(30) }
fn default_stalled_interval() -> Duration { Duration::from_secs(15) }
fn default_purge_grace() -> Duration { Duration::from_secs(3600) }
fn default_true() -> bool { true }
fn default_concurrency() -> usize { 5 }
fn default_email_rate_limit() -> RateLimit { RateLimit::per_second(10) }
fn default_pdf_rate_limit() -> RateLimit { RateLimit::per_second(5) }
fn default_claim_backoff() -> Duration { Duration::from_millis(50) }
fn default_poll_interval() -> Duration { Duration::from_millis(200) }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(30) }
fn default_mail_provider() -> MailProvider { MailProvider::Log }
fn default_mail_endpoint() -> String { "https://api.resend.com/emails".to_string() }
fn default_sender() -> String { "noreply@example.com".to_string() }
fn default_render_timeout() -> Duration { Duration::from_secs(60) }
fn default_service_name() -> String { "jobforge".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("JOBFORGE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a file, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("JOBFORGE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(JobforgeError::configuration(msg.to_string()));

        if self.workers.concurrency == 0 {
            return fail("workers.concurrency must be at least 1");
        }
        for (name, limit) in [("email", &self.workers.email_rate_limit), ("pdf", &self.workers.pdf_rate_limit)] {
            if limit.max == 0 || limit.window.is_zero() {
                return Err(JobforgeError::configuration(format!(
                    "workers.{}_rate_limit needs a positive max and window",
                    name
                )));
            }
        }
        if self.queue.max_attempts == 0 {
            return fail("queue.max_attempts must be at least 1");
        }
        if self.queue.backoff.delay_ms == 0 {
            return fail("queue.backoff.delay must be positive");
        }
        if self.queue.lock_duration.is_zero() || self.queue.stalled_interval.is_zero() {
            return fail("queue.lock_duration and queue.stalled_interval must be positive");
        }
        if self.submission.enabled && (self.submission.max_requests == 0 || self.submission.window.is_zero()) {
            return fail("submission needs a positive max_requests and window");
        }
        if self.mail.provider == MailProvider::Http && self.mail.api_key.as_deref().unwrap_or("").is_empty() {
            return fail("mail.api_key is required for the http mail provider");
        }
        Ok(())
    }
}
