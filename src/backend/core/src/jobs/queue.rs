//! Durable queue abstraction and the in-memory backend.
//!
//! A queue is one named lane of work. Every backend provides the same
//! atomic claim guarantee: a waiting job is handed to at most one caller of
//! [`QueueBackend::claim_next`]. The in-memory backend gets this from a
//! single mutex; the Redis backend from Lua scripts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::job::{after, BackoffPolicy, JobId, JobOptions, JobRecord, JobStatus, NewJob};
use crate::error::{JobforgeError, Result};

/// Failure reason recorded when a lock expires before the worker finishes.
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

// ═══════════════════════════════════════════════════════════════════════════════
// Settings & Stats
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue-level defaults, applied when the queue is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Attempts for jobs that do not set their own.
    pub max_attempts: u32,
    /// Priority for jobs that do not set their own. Lower runs first.
    pub default_priority: u32,
    pub backoff: BackoffPolicy,
    /// Completed records retained before the oldest is evicted.
    pub keep_completed: usize,
    /// Failed records retained before the oldest is evicted.
    pub keep_failed: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_priority: 0,
            backoff: BackoffPolicy::exponential(Duration::from_millis(2000)),
            keep_completed: 100,
            keep_failed: 500,
        }
    }
}

/// Per-status counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
    pub total: u64,
}

impl QueueStats {
    pub fn new(waiting: u64, active: u64, completed: u64, failed: u64, delayed: u64, paused: bool) -> Self {
        Self {
            waiting,
            active,
            completed,
            failed,
            delayed,
            paused,
            total: waiting + active + completed + failed + delayed,
        }
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Waiting => self.waiting,
            JobStatus::Active => self.active,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Delayed => self.delayed,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage and claim primitive for one queue.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Defaults this queue was created with.
    fn settings(&self) -> &QueueSettings;

    /// Admit one job. The record is durable when this returns.
    async fn enqueue(&self, name: &str, payload: serde_json::Value, options: JobOptions) -> Result<JobRecord>;

    /// Admit a batch. Either every entry is stored or none is.
    async fn enqueue_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>>;

    /// Atomically claim the next eligible job, promoting due delayed jobs first.
    ///
    /// Returns `None` when the queue is paused or nothing is eligible.
    async fn claim_next(&self, worker_id: &str, lock_duration: Duration) -> Result<Option<JobRecord>>;

    /// `Active → Completed`. Fails if `worker_id` no longer holds the job.
    async fn complete(&self, job_id: JobId, worker_id: &str, result: serde_json::Value) -> Result<JobRecord>;

    /// Record a failed attempt: `Active → Delayed` or `Active → Failed`.
    async fn retry(&self, job_id: JobId, worker_id: &str, reason: &str) -> Result<JobRecord>;

    /// Push the lock expiry forward. Returns false when the lock was lost.
    async fn extend_lock(&self, job_id: JobId, worker_id: &str, lock_duration: Duration) -> Result<bool>;

    /// Store handler progress (0..=100).
    async fn update_progress(&self, job_id: JobId, progress: u8) -> Result<()>;

    /// Fail every active job whose lock expired, consuming one attempt each.
    async fn reclaim_stalled(&self) -> Result<Vec<JobRecord>>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    /// Delete a non-active job. Active jobs yield `JobBusy`.
    async fn remove(&self, job_id: JobId) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn is_paused(&self) -> Result<bool>;

    /// Delete terminal jobs finished at least `grace` ago. Returns the count.
    async fn purge(&self, grace: Duration) -> Result<u64>;

    /// Delete waiting jobs, and delayed ones too when asked. Returns the count.
    async fn drain(&self, include_delayed: bool) -> Result<u64>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Release resources held by this queue.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates queue backends by name. The registry calls this lazily.
pub trait QueueFactory: Send + Sync {
    fn create(&self, name: &str, settings: QueueSettings) -> Arc<dyn QueueBackend>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, JobRecord>,
    /// Ordered by (priority, admission sequence).
    waiting: BTreeSet<(u32, u64, JobId)>,
    /// Ordered by due time.
    delayed: BTreeSet<(DateTime<Utc>, u64, JobId)>,
    active: HashSet<JobId>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    next_sequence: u64,
    paused: bool,
}

impl MemoryState {
    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn index(&mut self, job: &JobRecord) {
        match job.status {
            JobStatus::Waiting => {
                self.waiting.insert((job.priority, job.sequence, job.id));
            }
            JobStatus::Delayed => {
                let due = job.scheduled_at.unwrap_or(job.created_at);
                self.delayed.insert((due, job.sequence, job.id));
            }
            JobStatus::Active => {
                self.active.insert(job.id);
            }
            JobStatus::Completed => self.completed.push_back(job.id),
            JobStatus::Failed => self.failed.push_back(job.id),
        }
    }

    fn unindex(&mut self, job: &JobRecord) {
        match job.status {
            JobStatus::Waiting => {
                self.waiting.remove(&(job.priority, job.sequence, job.id));
            }
            JobStatus::Delayed => {
                let due = job.scheduled_at.unwrap_or(job.created_at);
                self.delayed.remove(&(due, job.sequence, job.id));
            }
            JobStatus::Active => {
                self.active.remove(&job.id);
            }
            JobStatus::Completed => self.completed.retain(|id| *id != job.id),
            JobStatus::Failed => self.failed.retain(|id| *id != job.id),
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(&(due, seq, id)) = self.delayed.iter().next() {
            if due > now {
                break;
            }
            self.delayed.remove(&(due, seq, id));
            if let Some(job) = self.jobs.get_mut(&id) {
                if job.promote(now).unwrap_or(false) {
                    self.waiting.insert((job.priority, job.sequence, job.id));
                }
            }
        }
    }

    fn evict(&mut self, settings: &QueueSettings) {
        while self.completed.len() > settings.keep_completed {
            if let Some(id) = self.completed.pop_front() {
                self.jobs.remove(&id);
            }
        }
        while self.failed.len() > settings.keep_failed {
            if let Some(id) = self.failed.pop_front() {
                self.jobs.remove(&id);
            }
        }
    }

    /// Take an active job out of the index so it can be mutated.
    fn take_active(&mut self, queue: &str, job_id: JobId, worker_id: &str) -> Result<JobRecord> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| JobforgeError::job_not_found(queue, job_id))?;
        if !job.is_locked_by(worker_id) {
            return Err(JobforgeError::invalid_state_transition(
                job_id,
                job.status,
                "finished (lock not held)",
            ));
        }
        self.active.remove(&job_id);
        self.jobs
            .remove(&job_id)
            .ok_or_else(|| JobforgeError::job_not_found(queue, job_id))
    }

    fn store(&mut self, job: JobRecord) {
        self.index(&job);
        self.jobs.insert(job.id, job);
    }
}

/// In-memory queue backend for tests and single-process development.
pub struct InMemoryQueueBackend {
    name: String,
    settings: QueueSettings,
    state: Mutex<MemoryState>,
}

impl InMemoryQueueBackend {
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(MemoryState::default()),
        }
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, name: &str, payload: serde_json::Value, options: JobOptions) -> Result<JobRecord> {
        let mut state = self.state.lock();
        let sequence = state.next_sequence();
        let job = JobRecord::new(&self.name, name, payload, &options, &self.settings, sequence, Utc::now());
        state.store(job.clone());
        tracing::debug!(queue = %self.name, job_id = %job.id, status = %job.status, "Job enqueued");
        Ok(job)
    }

    async fn enqueue_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let records: Vec<JobRecord> = jobs
            .into_iter()
            .map(|entry| {
                let sequence = state.next_sequence();
                JobRecord::new(&self.name, &entry.name, entry.payload, &entry.options, &self.settings, sequence, now)
            })
            .collect();
        for job in &records {
            state.store(job.clone());
        }
        tracing::debug!(queue = %self.name, count = records.len(), "Bulk enqueued");
        Ok(records)
    }

    async fn claim_next(&self, worker_id: &str, lock_duration: Duration) -> Result<Option<JobRecord>> {
        let mut state = self.state.lock();
        if state.paused {
            return Ok(None);
        }
        let now = Utc::now();
        state.promote_due(now);

        let Some(&key) = state.waiting.iter().next() else {
            return Ok(None);
        };
        state.waiting.remove(&key);
        let (_, _, id) = key;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.claim(worker_id, lock_duration, now)?;
        let claimed = job.clone();
        state.active.insert(id);
        Ok(Some(claimed))
    }

    async fn complete(&self, job_id: JobId, worker_id: &str, result: serde_json::Value) -> Result<JobRecord> {
        let mut state = self.state.lock();
        let mut job = state.take_active(&self.name, job_id, worker_id)?;
        job.complete(result, Utc::now())?;
        state.store(job.clone());
        state.evict(&self.settings);
        Ok(job)
    }

    async fn retry(&self, job_id: JobId, worker_id: &str, reason: &str) -> Result<JobRecord> {
        let mut state = self.state.lock();
        let mut job = state.take_active(&self.name, job_id, worker_id)?;
        job.fail_attempt(reason, Utc::now())?;
        state.store(job.clone());
        state.evict(&self.settings);
        Ok(job)
    }

    async fn extend_lock(&self, job_id: JobId, worker_id: &str, lock_duration: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.is_locked_by(worker_id) => {
                if let Some(lock) = job.lock.as_mut() {
                    lock.expires_at = after(Utc::now(), lock_duration);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(&self, job_id: JobId, progress: u8) -> Result<()> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| JobforgeError::job_not_found(&self.name, job_id))?;
        job.progress = progress.min(100);
        Ok(())
    }

    async fn reclaim_stalled(&self) -> Result<Vec<JobRecord>> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let stalled: Vec<JobId> = state
            .active
            .iter()
            .filter(|id| state.jobs.get(id).map(|j| j.is_stalled(now)).unwrap_or(false))
            .copied()
            .collect();

        let mut reclaimed = Vec::with_capacity(stalled.len());
        for id in stalled {
            state.active.remove(&id);
            if let Some(mut job) = state.jobs.remove(&id) {
                job.fail_attempt(STALLED_REASON, now)?;
                state.store(job.clone());
                reclaimed.push(job);
            }
        }
        state.evict(&self.settings);
        Ok(reclaimed)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.state.lock().jobs.get(&job_id).cloned())
    }

    async fn remove(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| JobforgeError::job_not_found(&self.name, job_id))?;
        if job.status == JobStatus::Active {
            return Err(JobforgeError::job_busy(job_id));
        }
        state.unindex(&job);
        state.jobs.remove(&job_id);
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats::new(
            state.waiting.len() as u64,
            state.active.len() as u64,
            state.completed.len() as u64,
            state.failed.len() as u64,
            state.delayed.len() as u64,
            state.paused,
        ))
    }

    async fn pause(&self) -> Result<()> {
        self.state.lock().paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.state.lock().paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().paused)
    }

    async fn purge(&self, grace: Duration) -> Result<u64> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let expired: HashSet<JobId> = state
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.finished_at.map(|t| after(t, grace) <= now).unwrap_or(true))
            .map(|job| job.id)
            .collect();

        for id in &expired {
            state.jobs.remove(id);
        }
        state.completed.retain(|id| !expired.contains(id));
        state.failed.retain(|id| !expired.contains(id));
        Ok(expired.len() as u64)
    }

    async fn drain(&self, include_delayed: bool) -> Result<u64> {
        let mut state = self.state.lock();
        let mut ids: Vec<JobId> = state.waiting.iter().map(|(_, _, id)| *id).collect();
        state.waiting.clear();
        if include_delayed {
            ids.extend(state.delayed.iter().map(|(_, _, id)| *id));
            state.delayed.clear();
        }
        for id in &ids {
            state.jobs.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for [`InMemoryQueueBackend`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryQueueFactory;

impl QueueFactory for InMemoryQueueFactory {
    fn create(&self, name: &str, settings: QueueSettings) -> Arc<dyn QueueBackend> {
        Arc::new(InMemoryQueueBackend::new(name, settings))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
