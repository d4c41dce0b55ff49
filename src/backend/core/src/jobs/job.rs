//! Job records and their state machine.
//!
//! - **JobRecord**: the persisted unit of work
//! - **JobStatus**: the five states a record can be in
//! - **BackoffPolicy**: delay applied before a failed job becomes claimable again
//! - **JobOptions**: per-job admission options merged over queue defaults
//! - **JobOutcome**: what a handler reports back to the worker
//!
//! Legal transitions:
//!
//! ```text
//!   admission ──► Waiting ◄──── Delayed ◄──┐
//!       │            │             ▲       │
//!       └──(delay)───┼─────────────┘       │ failed, attempts remain
//!                    ▼                     │
//!                  Active ─────────────────┤
//!                    │                     │ failed, attempts exhausted
//!                    ▼                     ▼
//!                Completed               Failed
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, JobforgeError, Result};

use super::queue::QueueSettings;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job, assigned at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = JobforgeError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| {
            JobforgeError::new(ErrorCode::InvalidInput, format!("Invalid job id: {}", s))
                .with_source(e)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for claiming
    Waiting,
    /// Scheduled for a future time (initial delay or retry backoff)
    Delayed,
    /// Held by exactly one worker
    Active,
    /// Handler succeeded
    Completed,
    /// Handler failed with no attempts left
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Waiting,
        Self::Delayed,
        Self::Active,
        Self::Completed,
        Self::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Delayed, Self::Waiting)
                | (Self::Waiting, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Delayed)
                | (Self::Active, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "delayed" => Ok(Self::Delayed),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(JobforgeError::new(
                ErrorCode::DeserializationError,
                format!("Unknown job status: {}", other),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl BackoffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

/// Delay policy applied before a failed job re-enters `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    /// Base delay in milliseconds.
    #[serde(rename = "delay")]
    pub delay_ms: u64,
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn exponential(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: base.as_millis() as u64,
        }
    }

    /// Delay after the `attempts_made`-th attempt failed (1-based).
    ///
    /// Exponential: `base * 2^(attempts_made - 1)`, saturating.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let exp = attempts_made.saturating_sub(1).min(63);
                self.delay_ms.saturating_mul(1u64 << exp)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(2000))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-job options supplied at admission. Unset fields fall back to the
/// queue's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    /// Initial delay in milliseconds.
    #[serde(default, rename = "delay", skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Maximum number of attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffPolicy>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// One entry of a bulk admission.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

impl NewJob {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Lock held by the worker that claimed an active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLock {
    pub owner: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

/// The persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub queue_name: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub priority: u32,
    /// Admission order within the queue, used for FIFO tie-breaking.
    pub sequence: u64,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub progress: u8,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub lock: Option<JobLock>,
}

impl JobRecord {
    /// Build a record for admission, merging `options` over `settings`.
    pub fn new(
        queue_name: &str,
        name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
        settings: &QueueSettings,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let delay_ms = options.delay_ms.unwrap_or(0);
        let (status, scheduled_at) = if delay_ms > 0 {
            (
                JobStatus::Delayed,
                Some(after(now, Duration::from_millis(delay_ms))),
            )
        } else {
            (JobStatus::Waiting, None)
        };

        Self {
            id: JobId::new(),
            queue_name: queue_name.to_string(),
            name: name.to_string(),
            payload,
            status,
            priority: options.priority.unwrap_or(settings.default_priority),
            sequence,
            attempts_made: 0,
            max_attempts: options.attempts.unwrap_or(settings.max_attempts).max(1),
            backoff: options.backoff.unwrap_or(settings.backoff),
            progress: 0,
            created_at: now,
            scheduled_at,
            started_at: None,
            finished_at: None,
            result: None,
            failure_reason: None,
            lock: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobforgeError::invalid_state_transition(
                self.id,
                self.status,
                next,
            ));
        }
        self.status = next;
        Ok(())
    }

    /// `Delayed → Waiting` once `scheduled_at` has elapsed.
    pub fn promote(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.scheduled_at {
            Some(due) if due > now => Ok(false),
            _ => {
                self.transition(JobStatus::Waiting)?;
                Ok(true)
            }
        }
    }

    /// `Waiting → Active`. Stamps `started_at` on the first claim only.
    pub fn claim(&mut self, owner: &str, lock_duration: Duration, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Active)?;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.lock = Some(JobLock {
            owner: owner.to_string(),
            expires_at: after(now, lock_duration),
        });
        Ok(())
    }

    /// `Active → Completed`. The finished attempt is counted.
    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.attempts_made = (self.attempts_made + 1).min(self.max_attempts);
        self.finished_at = Some(now);
        self.result = Some(result);
        self.lock = None;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// `Active → Delayed` with a backoff when attempts remain, otherwise
    /// `Active → Failed`. Returns whether the job will be retried.
    pub fn fail_attempt(&mut self, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        if self.status != JobStatus::Active {
            return Err(JobforgeError::invalid_state_transition(
                self.id,
                self.status,
                JobStatus::Delayed,
            ));
        }
        self.attempts_made = (self.attempts_made + 1).min(self.max_attempts);
        self.lock = None;

        if self.attempts_made < self.max_attempts {
            self.transition(JobStatus::Delayed)?;
            let delay = self.backoff.delay_for_attempt(self.attempts_made);
            self.scheduled_at = Some(after(now, delay));
            Ok(true)
        } else {
            self.transition(JobStatus::Failed)?;
            self.finished_at = Some(now);
            self.failure_reason = Some(reason.to_string());
            Ok(false)
        }
    }

    /// Whether `worker` currently holds this job.
    pub fn is_locked_by(&self, worker: &str) -> bool {
        self.status == JobStatus::Active
            && self.lock.as_ref().map(|l| l.owner == worker).unwrap_or(false)
    }

    /// Active with an expired lock.
    pub fn is_stalled(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active
            && self.lock.as_ref().map(|l| l.expires_at <= now).unwrap_or(true)
    }
}

/// `now + duration`, clamped instead of overflowing.
pub(crate) fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// What a handler reports for one attempt.
///
/// Serialises as `{ "success": true, "data": .. }` or
/// `{ "success": false, "error": ".." }`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl JobOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success(data)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl<E: fmt::Display> From<std::result::Result<serde_json::Value, E>> for JobOutcome {
    fn from(result: std::result::Result<serde_json::Value, E>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OutcomeBody {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for JobOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let body = match self {
            Self::Success(data) => OutcomeBody {
                success: true,
                data: Some(data.clone()),
                error: None,
            },
            Self::Failure(error) => OutcomeBody {
                success: false,
                data: None,
                error: Some(error.clone()),
            },
        };
        body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobOutcome {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let body = OutcomeBody::deserialize(deserializer)?;
        Ok(if body.success {
            Self::Success(body.data.unwrap_or(serde_json::Value::Null))
        } else {
            Self::Failure(body.error.unwrap_or_else(|| "Unknown error".to_string()))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
