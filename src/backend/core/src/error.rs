//! Error handling for the job engine.
//!
//! This module provides:
//! - A single error type carrying a machine-readable code and context
//! - HTTP status code mapping for API responses
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobforge_core::error::{JobforgeError, Result, ErrorContext};
//!
//! fn load(id: &str) -> Result<()> {
//!     parse(id).with_error_code(ErrorCode::InvalidInput)?;
//!     Ok(())
//! }
//! ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for job engine operations.
pub type Result<T> = std::result::Result<T, JobforgeError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    QueueNotFound,
    JobBusy,
    InvalidStateTransition,
    ProcessingError,

    // Broker Errors (2000-2099)
    BrokerUnavailable,
    BrokerError,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // External Service Errors (3000-3099)
    ExternalServiceError,
    NetworkError,
    Timeout,

    // Authentication/Authorization (4000-4099)
    Unauthorized,
    Forbidden,
    InvalidToken,
    TokenExpired,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,
    RateLimitExceeded,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::QueueNotFound => 1001,
            Self::JobBusy => 1002,
            Self::InvalidStateTransition => 1003,
            Self::ProcessingError => 1004,

            Self::BrokerUnavailable => 2000,
            Self::BrokerError => 2001,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ExternalServiceError => 3000,
            Self::NetworkError => 3001,
            Self::Timeout => 3002,

            Self::Unauthorized => 4000,
            Self::Forbidden => 4001,
            Self::InvalidToken => 4002,
            Self::TokenExpired => 4003,

            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,
            Self::RateLimitExceeded => 4102,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::JobNotFound | Self::QueueNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::JobBusy | Self::InvalidStateTransition => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::ValidationError | Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,

            // Too Many Requests (429)
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,

            // Timeout (504)
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // Unauthorized (401)
            Self::Unauthorized | Self::InvalidToken | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            // Forbidden (403)
            Self::Forbidden => StatusCode::FORBIDDEN,

            // Service Unavailable (503)
            Self::BrokerUnavailable | Self::ExternalServiceError => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // Bad Gateway (502)
            Self::NetworkError => StatusCode::BAD_GATEWAY,

            // Internal Server Error (500)
            Self::ProcessingError
            | Self::BrokerError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable
                | Self::BrokerError
                | Self::RateLimitExceeded
                | Self::Timeout
                | Self::NetworkError
                | Self::ExternalServiceError
                | Self::ProcessingError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            2000..=2099 => "broker",
            2200..=2299 => "serialization",
            3000..=3099 => "external_service",
            4000..=4099 => "authentication",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, validation failures)
    Low,
    /// Operational issues (rate limits, timeouts, busy jobs)
    Medium,
    /// System errors (broker command failures, bad configuration)
    High,
    /// The broker is gone or the process hit a bug
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::JobNotFound
            | ErrorCode::QueueNotFound
            | ErrorCode::InvalidStateTransition => Self::Low,

            ErrorCode::JobBusy
            | ErrorCode::RateLimitExceeded
            | ErrorCode::Timeout
            | ErrorCode::ProcessingError
            | ErrorCode::Unauthorized
            | ErrorCode::Forbidden
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired => Self::Medium,

            ErrorCode::BrokerError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ExternalServiceError
            | ErrorCode::NetworkError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration => Self::High,

            ErrorCode::BrokerUnavailable | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job, queue)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Per-field validation messages
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, Vec<String>>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_fields(mut self, fields: HashMap<String, Vec<String>>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.entity_id.is_none()
            && self.fields.is_empty()
            && self.retry_after_secs.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type of the job engine.
#[derive(Error, Debug)]
pub struct JobforgeError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for JobforgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl JobforgeError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Create a configuration error. Raised at startup, never per job.
    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Invalid configuration",
            message,
        )
    }

    /// A required setting is absent.
    pub fn missing_configuration(key: &str) -> Self {
        Self::new(
            ErrorCode::MissingConfiguration,
            format!("Missing required configuration: {}", key),
        )
        .with_context("key", key)
    }

    pub fn job_not_found(queue: &str, job_id: impl fmt::Display) -> Self {
        let job_id = job_id.to_string();
        Self::new(
            ErrorCode::JobNotFound,
            format!("Job {} not found in queue {}", job_id, queue),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("job", job_id)
                .with_context("queue", queue),
        )
    }

    pub fn queue_not_found(queue: &str) -> Self {
        Self::new(ErrorCode::QueueNotFound, format!("Queue not found: {}", queue))
            .with_details(ErrorDetails::new().with_entity("queue", queue))
    }

    /// The job is held by a worker and cannot be mutated.
    pub fn job_busy(job_id: impl fmt::Display) -> Self {
        let job_id = job_id.to_string();
        Self::new(
            ErrorCode::JobBusy,
            format!("Job {} is active and cannot be modified", job_id),
        )
        .with_details(ErrorDetails::new().with_entity("job", job_id))
    }

    pub fn invalid_state_transition(
        job_id: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Job {} cannot move from {} to {}", job_id, from, to),
        )
    }

    pub fn processing(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::with_internal(ErrorCode::ProcessingError, "Job processing failed", reason)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            "Too many requests, retry later",
        )
        .with_details(ErrorDetails::new().with_retry_after(retry_after_secs))
    }

    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::BrokerUnavailable,
            "The job broker is unavailable",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "jobforge_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,

    pub numeric_code: u32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Request ID for tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&JobforgeError> for ErrorResponse {
    fn from(error: &JobforgeError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                request_id: None,
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for JobforgeError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let retry_after = self.details.retry_after_secs;
        let body = ErrorResponse::from(&self);

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| JobforgeError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| JobforgeError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| JobforgeError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| JobforgeError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for JobforgeError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal()
            || error.is_connection_dropped()
            || error.is_io_error()
        {
            (ErrorCode::BrokerUnavailable, "The job broker is unavailable")
        } else if error.is_timeout() {
            (ErrorCode::BrokerUnavailable, "The job broker timed out")
        } else {
            (ErrorCode::BrokerError, "A broker error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for JobforgeError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for JobforgeError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::Timeout, "External service request timed out")
        } else if error.is_connect() {
            (ErrorCode::NetworkError, "Failed to connect to external service")
        } else if error.is_status() {
            match error.status().map(|s| s.as_u16()) {
                Some(429) => (
                    ErrorCode::RateLimitExceeded,
                    "Rate limited by external service",
                ),
                Some(500..=599) => (
                    ErrorCode::ExternalServiceError,
                    "External service is temporarily unavailable",
                ),
                _ => (
                    ErrorCode::ExternalServiceError,
                    "External service returned an error",
                ),
            }
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<tokio::sync::AcquireError> for JobforgeError {
    fn from(error: tokio::sync::AcquireError) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "Resource acquisition failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for JobforgeError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for JobforgeError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut => (ErrorCode::Timeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::NetworkError, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for JobforgeError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<JobforgeError>() {
            Ok(jobforge_error) => jobforge_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for JobforgeError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::JobNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::JobBusy.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::ValidationError.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::RateLimitExceeded.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::BrokerUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::BrokerUnavailable.is_retryable());
        assert!(ErrorCode::RateLimitExceeded.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::JobBusy.is_retryable());
    }

    #[test]
    fn test_job_busy_error() {
        let id = uuid::Uuid::new_v4();
        let error = JobforgeError::job_busy(id);
        assert_eq!(error.code(), ErrorCode::JobBusy);
        assert_eq!(error.details().entity_id, Some(id.to_string()));
        assert!(error.user_message().contains("active"));
    }

    #[test]
    fn test_error_context() {
        let error = JobforgeError::new(ErrorCode::ValidationError, "Invalid input")
            .with_context("field", "priority")
            .with_context("max", 10);

        assert!(error.details().context.contains_key("field"));
        assert_eq!(error.details().context["max"], serde_json::json!(10));
    }

    #[test]
    fn test_error_response_serialization() {
        let error = JobforgeError::validation("priority must be between 1 and 10");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("VALIDATION_ERROR"));
        assert!(json.contains("\"success\":false"));
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after_header() {
        let response = JobforgeError::rate_limited(42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ValidationError),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::JobBusy),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ConfigurationError),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::BrokerUnavailable),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_option_context_maps_to_not_found() {
        let missing: Option<u32> = None;
        let err = missing.context("no such job").unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
    }

    #[test]
    fn test_error_display() {
        let error = JobforgeError::with_internal(
            ErrorCode::BrokerError,
            "A broker error occurred",
            "WRONGTYPE Operation against a key",
        );

        let display = format!("{}", error);
        assert!(display.contains("BrokerError"));
        assert!(display.contains("WRONGTYPE"));
    }
}
