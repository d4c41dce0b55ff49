//! Durable background job processing.
//!
//! - **Job records**: the lifecycle state machine and retry policy
//! - **Queues**: the [`QueueBackend`] contract, an in-process backend and a
//!   Redis backend with atomic transitions
//! - **Registry**: queue name → backend, created lazily with default settings
//! - **Workers**: bounded-concurrency consumers with claim rate limiting,
//!   lock heartbeats and stalled-job recovery
//! - **Handlers**: email delivery and PDF generation
//! - **Metrics**: per-worker processing counters
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   add_job    ┌──────────────┐   claim_next   ┌──────────────┐
//! │  Submission  │─────────────▶│   Registry   │◀───────────────│    Worker    │
//! │     API      │              │  (queues by  │   complete /   │ (semaphore + │
//! └──────────────┘              │    name)     │     retry      │   limiter)   │
//!                               └──────┬───────┘                └──────┬───────┘
//!                                      │                               │
//!                               ┌──────▼───────┐                ┌──────▼───────┐
//!                               │ QueueBackend │                │  JobHandler  │
//!                               │ memory/redis │                │  email / pdf │
//!                               └──────────────┘                └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobforge_core::jobs::{
//!     InMemoryQueueFactory, JobOptions, JobWorker, QueueRegistry, QueueSettings, WorkerConfig,
//! };
//!
//! let registry = QueueRegistry::new(Arc::new(InMemoryQueueFactory), QueueSettings::default());
//! registry.add_job("email", "send-email", payload, JobOptions::new().with_priority(1)).await?;
//!
//! let handle = JobWorker::new(WorkerConfig::new("email"), registry.queue("email"), handler).start();
//! handle.close().await?;
//! ```

pub mod events;
pub mod handlers;
pub mod job;
pub mod limiter;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod registry;
pub mod worker;

pub use events::{TracingObserver, WorkerEvent, WorkerObserver};
pub use handlers::{from_fn, FnHandler, JobContext, JobHandler};
pub use job::{
    BackoffKind, BackoffPolicy, JobId, JobLock, JobOptions, JobOutcome, JobRecord, JobStatus,
    NewJob,
};
pub use limiter::{ClaimRateLimiter, RateLimit};
pub use metrics::{MetricsCollector, MetricsRegistry, MetricsSnapshot};
pub use queue::{
    InMemoryQueueBackend, InMemoryQueueFactory, QueueBackend, QueueFactory, QueueSettings,
    QueueStats, STALLED_REASON,
};
pub use redis::{RedisQueueBackend, RedisQueueFactory};
pub use registry::{start_purge_task, QueueName, QueueRegistry};
pub use worker::{JobWorker, WorkerConfig, WorkerHandle, WorkerSet, WorkerStats};
