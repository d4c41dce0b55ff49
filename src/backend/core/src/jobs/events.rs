//! Worker lifecycle events and observers.

use serde::Serialize;
use std::time::Duration;

use super::job::JobId;

/// Something that happened inside a worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Completed {
        job_id: JobId,
        job_name: String,
        #[serde(with = "humantime_serde")]
        latency: Duration,
        result: serde_json::Value,
    },
    Failed {
        job_id: JobId,
        job_name: String,
        reason: String,
        attempts_made: u32,
        will_retry: bool,
        #[serde(with = "humantime_serde")]
        latency: Duration,
    },
    /// A job's lock expired before its worker finished it.
    Stalled {
        job_id: JobId,
        job_name: String,
        attempts_made: u32,
        will_retry: bool,
    },
    Progress {
        job_id: JobId,
        progress: u8,
    },
    /// Claim-loop infrastructure failure.
    Error {
        message: String,
    },
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Stalled { .. } => "stalled",
            Self::Progress { .. } => "progress",
            Self::Error { .. } => "error",
        }
    }
}

/// Receives every event a worker emits. Called inline, so keep it cheap.
pub trait WorkerObserver: Send + Sync {
    fn on_event(&self, worker: &str, event: &WorkerEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WorkerObserver for TracingObserver {
    fn on_event(&self, worker: &str, event: &WorkerEvent) {
        match event {
            WorkerEvent::Completed { job_id, job_name, latency, .. } => {
                tracing::info!(
                    worker = %worker,
                    job_id = %job_id,
                    job_name = %job_name,
                    latency_ms = latency.as_millis() as u64,
                    "Job completed"
                );
            }
            WorkerEvent::Failed { job_id, job_name, reason, attempts_made, will_retry, .. } => {
                tracing::warn!(
                    worker = %worker,
                    job_id = %job_id,
                    job_name = %job_name,
                    attempts_made,
                    will_retry,
                    reason = %reason,
                    "Job failed"
                );
            }
            WorkerEvent::Stalled { job_id, job_name, attempts_made, will_retry } => {
                tracing::warn!(
                    worker = %worker,
                    job_id = %job_id,
                    job_name = %job_name,
                    attempts_made,
                    will_retry,
                    "Job stalled"
                );
            }
            WorkerEvent::Progress { job_id, progress } => {
                tracing::debug!(worker = %worker, job_id = %job_id, progress, "Job progress");
            }
            WorkerEvent::Error { message } => {
                tracing::error!(worker = %worker, error = %message, "Worker error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = WorkerEvent::Progress {
            job_id: JobId::new(),
            progress: 40,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "progress");
        assert_eq!(value["progress"], 40);
        assert_eq!(event.kind(), "progress");
    }
}
