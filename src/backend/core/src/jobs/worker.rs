//! Job worker for concurrent job execution.
//!
//! One worker drives one queue. The claim loop only asks the queue for work
//! when a concurrency permit is free and the claim limiter has quota; each
//! claimed job then runs on its own task holding that permit, so a slow
//! handler never blocks the loop.

use futures::FutureExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::events::{WorkerEvent, WorkerObserver};
use super::handlers::{JobContext, JobHandler};
use super::job::{JobId, JobOutcome, JobRecord, JobStatus};
use super::limiter::{ClaimRateLimiter, RateLimit};
use super::queue::QueueBackend;
use crate::error::{JobforgeError, Result};

/// Upper bound for the claim-loop backoff after broker errors.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Configuration for the job worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker name/identifier
    pub name: String,
    /// Maximum concurrent handler invocations
    pub concurrency: usize,
    /// Claim rate limit; `None` means unlimited
    pub rate_limit: Option<RateLimit>,
    #[serde(with = "humantime_serde")]
    pub lock_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub stalled_interval: Duration,
    /// Pause after the limiter denies a claim
    #[serde(with = "humantime_serde")]
    pub claim_backoff: Duration,
    /// Pause when the queue had nothing to claim
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Time in-flight jobs get to finish on close
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "jobforge-worker".to_string(),
            concurrency: 5,
            rate_limit: None,
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(15),
            claim_backoff: Duration::from_millis(50),
            poll_interval: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    pub fn with_stalled_interval(mut self, interval: Duration) -> Self {
        self.stalled_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Attempts finished, either way
    pub processed: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    /// Currently running jobs
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

/// Job worker that processes jobs from a queue.
pub struct JobWorker {
    config: WorkerConfig,
    queue: Arc<dyn QueueBackend>,
    handler: Arc<dyn JobHandler>,
    observers: Vec<Arc<dyn WorkerObserver>>,
    stats: WorkerStats,
}

impl JobWorker {
    pub fn new(config: WorkerConfig, queue: Arc<dyn QueueBackend>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            config,
            queue,
            handler,
            observers: Vec::new(),
            stats: WorkerStats::new(),
        }
    }

    /// Register an observer. Observers only see events emitted after start.
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let name = self.config.name.clone();

        let shared = Arc::new(WorkerShared {
            worker_id: format!("{}:{}", self.config.name, uuid::Uuid::new_v4()),
            limiter: self.config.rate_limit.map(ClaimRateLimiter::new),
            config: self.config,
            queue: self.queue,
            handler: self.handler,
            observers: Arc::new(self.observers),
            stats: self.stats,
        });

        let span = tracing::info_span!("worker", worker = %name, queue = %shared.queue.name());
        let task = tokio::spawn(shared.run(shutdown_rx).instrument(span));

        WorkerHandle {
            name,
            shutdown: shutdown_tx,
            task,
            stats,
        }
    }
}

struct WorkerShared {
    config: WorkerConfig,
    /// Lock owner id, unique per started worker.
    worker_id: String,
    queue: Arc<dyn QueueBackend>,
    handler: Arc<dyn JobHandler>,
    observers: Arc<Vec<Arc<dyn WorkerObserver>>>,
    limiter: Option<ClaimRateLimiter>,
    stats: WorkerStats,
}

impl WorkerShared {
    fn emit(&self, event: WorkerEvent) {
        for observer in self.observers.iter() {
            observer.on_event(&self.config.name, &event);
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut stalled_check = tokio::time::interval(self.config.stalled_interval.max(Duration::from_millis(1)));
        stalled_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut broker_failures: u32 = 0;

        tracing::info!(
            worker = %self.config.name,
            concurrency,
            queue = %self.queue.name(),
            "Job worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = stalled_check.tick() => {
                    self.reclaim_stalled().await;
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(wait) = self.limiter.as_ref().and_then(|l| l.wait_time()) {
                drop(permit);
                counter!("jobforge_rate_limited_total", "worker" => self.config.name.clone()).increment(1);
                if sleep_or_shutdown(wait.min(self.config.claim_backoff), &mut shutdown).await {
                    break;
                }
                continue;
            }

            match self.queue.claim_next(&self.worker_id, self.config.lock_duration).await {
                Ok(Some(job)) => {
                    broker_failures = 0;
                    if let Some(limiter) = &self.limiter {
                        limiter.record();
                    }
                    tokio::spawn(self.clone().process(job, permit));
                }
                Ok(None) => {
                    broker_failures = 0;
                    drop(permit);
                    if sleep_or_shutdown(self.config.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    broker_failures = broker_failures.saturating_add(1);
                    self.emit(WorkerEvent::Error {
                        message: e.to_string(),
                    });
                    let backoff = error_backoff(self.config.claim_backoff, broker_failures);
                    if sleep_or_shutdown(backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker = %self.config.name, "Worker shutting down");

        let drained = tokio::time::timeout(
            self.config.shutdown_timeout,
            semaphore.acquire_many(concurrency as u32),
        )
        .await;
        match drained {
            Ok(_) => tracing::info!(worker = %self.config.name, "Worker stopped"),
            Err(_) => tracing::warn!(
                worker = %self.config.name,
                in_flight = self.stats.active(),
                "Worker stopped with jobs still running; their locks will expire"
            ),
        }
    }

    async fn process(self: Arc<Self>, job: JobRecord, _permit: OwnedSemaphorePermit) {
        let span = tracing::info_span!(
            "job",
            queue = %self.queue.name(),
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempts_made + 1,
        );
        self.execute(job).instrument(span).await
    }

    async fn execute(&self, job: JobRecord) {
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let heartbeat = self.spawn_heartbeat(job.id);

        let ctx = JobContext::new(job.clone(), self.queue.clone())
            .with_observers(self.config.name.clone(), self.observers.clone());
        let outcome = AssertUnwindSafe(self.handler.handle(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| JobOutcome::failure(panic_reason(panic.as_ref())));

        heartbeat.abort();
        let latency = started.elapsed();
        let queue = self.queue.name().to_string();
        histogram!("jobforge_job_duration_seconds", "queue" => queue.clone()).record(latency.as_secs_f64());

        match outcome {
            JobOutcome::Success(result) => {
                match self.queue.complete(job.id, &self.worker_id, result.clone()).await {
                    Ok(_) => {
                        self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                        counter!("jobforge_jobs_completed_total", "queue" => queue).increment(1);
                        self.emit(WorkerEvent::Completed {
                            job_id: job.id,
                            job_name: job.name.clone(),
                            latency,
                            result,
                        });
                    }
                    Err(e) => self.lost(job.id, "completion", e),
                }
            }
            JobOutcome::Failure(reason) => {
                match self.queue.retry(job.id, &self.worker_id, &reason).await {
                    Ok(record) => {
                        let will_retry = record.status == JobStatus::Delayed;
                        self.stats.failed.fetch_add(1, Ordering::Relaxed);
                        if will_retry {
                            counter!("jobforge_jobs_retried_total", "queue" => queue).increment(1);
                        } else {
                            counter!("jobforge_jobs_failed_total", "queue" => queue).increment(1);
                        }
                        self.emit(WorkerEvent::Failed {
                            job_id: job.id,
                            job_name: job.name.clone(),
                            reason,
                            attempts_made: record.attempts_made,
                            will_retry,
                            latency,
                        });
                    }
                    Err(e) => self.lost(job.id, "failure", e),
                }
            }
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// The outcome could not be recorded, usually because the lock expired
    /// and the job was reclaimed.
    fn lost(&self, job_id: JobId, what: &str, error: JobforgeError) {
        self.emit(WorkerEvent::Error {
            message: format!("Failed to record {} of job {}: {}", what, job_id, error),
        });
    }

    fn spawn_heartbeat(&self, job_id: JobId) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let worker_id = self.worker_id.clone();
        let lock_duration = self.config.lock_duration;
        let every = (lock_duration / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                ticker.tick().await;
                match queue.extend_lock(job_id, &worker_id, lock_duration).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, "Job lock lost");
                        break;
                    }
                    Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Lock extension failed"),
                }
            }
        })
    }

    async fn reclaim_stalled(&self) {
        match self.queue.reclaim_stalled().await {
            Ok(jobs) => {
                for job in jobs {
                    counter!("jobforge_jobs_stalled_total", "queue" => self.queue.name().to_string()).increment(1);
                    self.emit(WorkerEvent::Stalled {
                        job_id: job.id,
                        job_name: job.name,
                        attempts_made: job.attempts_made,
                        will_retry: job.status == JobStatus::Delayed,
                    });
                }
            }
            Err(e) => self.emit(WorkerEvent::Error {
                message: format!("Stalled job check failed: {}", e),
            }),
        }
    }
}

/// Sleep, returning early with `true` if shutdown was requested.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

fn error_backoff(base: Duration, failures: u32) -> Duration {
    let base = base.max(Duration::from_millis(10));
    base.saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(MAX_ERROR_BACKOFF)
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Handler panicked: {}", message)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handles
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: WorkerStats,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the worker to stop claiming. Does not wait.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop claiming and wait for in-flight jobs, bounded by the shutdown timeout.
    pub async fn close(self) -> Result<()> {
        self.shutdown();
        self.task
            .await
            .map_err(|e| JobforgeError::internal(format!("Worker '{}' task failed: {}", self.name, e)))
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

/// The set of workers a process runs, closed together.
#[derive(Default)]
pub struct WorkerSet {
    handles: Vec<WorkerHandle>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: WorkerHandle) {
        self.handles.push(handle);
    }

    pub fn names(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every worker concurrently.
    pub async fn close_all(self) -> Result<()> {
        for handle in &self.handles {
            handle.shutdown();
        }
        let results = futures::future::join_all(self.handles.into_iter().map(WorkerHandle::close)).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        tracing::info!("All workers closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.lock_duration, Duration::from_secs(30));
        assert!(config.rate_limit.is_none());
        assert_eq!(WorkerConfig::new("x").with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::new();
        assert_eq!(stats.processed(), 0);
        assert_eq!(stats.active(), 0);

        stats.processed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.processed(), 1);
    }

    #[test]
    fn test_error_backoff_is_capped() {
        let base = Duration::from_millis(50);
        assert_eq!(error_backoff(base, 1), Duration::from_millis(50));
        assert_eq!(error_backoff(base, 3), Duration::from_millis(200));
        assert_eq!(error_backoff(base, 30), MAX_ERROR_BACKOFF);
    }

    #[test]
    fn test_panic_reason() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "Handler panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_reason(payload.as_ref()), "Handler panicked: bang");
    }
}
