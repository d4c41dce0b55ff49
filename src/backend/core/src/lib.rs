#![allow(clippy::result_large_err)]
//! # Jobforge Core
//!
//! Durable background job processing for transactional email and PDF
//! generation.
//!
//! ## Architecture
//!
//! - **Jobs**: Job records, durable queues (in-memory and Redis), the queue
//!   registry and rate-limited workers with retry and backoff
//! - **Handlers**: Email delivery and PDF rendering
//! - **Submission**: Request validation and admission into the right lane
//! - **API**: Axum HTTP surface for submission, inspection and admin controls
//! - **Middleware**: Admin authentication and per-caller submission limits
//! - **Observability**: Structured logging, tracing and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod observability;
pub mod submission;
pub mod validation;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, JobforgeError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, JobforgeError, Result};
    pub use crate::jobs::{
        BackoffKind, BackoffPolicy, InMemoryQueueBackend, InMemoryQueueFactory, JobContext,
        JobHandler, JobId, JobOptions, JobOutcome, JobRecord, JobStatus, JobWorker,
        MetricsCollector, MetricsRegistry, NewJob, QueueBackend, QueueFactory, QueueName,
        QueueRegistry, QueueSettings, QueueStats, RateLimit, RedisQueueBackend,
        RedisQueueFactory, WorkerConfig, WorkerEvent, WorkerHandle, WorkerObserver, WorkerSet,
    };
    pub use crate::jobs::handlers::{
        DocumentRenderer, EmailHandler, EmailPayload, EmailTemplate, MailTransport, PdfHandler,
        PdfPayload,
    };
    pub use crate::submission::{SubmitRequest, SubmitResponse, Submission};
}
