//! Per-worker processing counters.
//!
//! Process-local only; each worker gets its own collector, registered as an
//! observer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::events::{WorkerEvent, WorkerObserver};

#[derive(Debug, Default)]
struct Counters {
    succeeded: u64,
    failed: u64,
    total_processing: Duration,
    last_processed_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub worker: String,
    pub succeeded: u64,
    pub failed: u64,
    pub total_processed: u64,
    /// `"xx.xx%"`, or `"0%"` before anything ran.
    pub success_rate: String,
    pub avg_processing_time_ms: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Aggregates completed/failed events of one worker.
#[derive(Debug)]
pub struct MetricsCollector {
    worker: String,
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn record_success(&self, latency: Duration) {
        let mut c = self.counters.lock();
        c.succeeded += 1;
        c.total_processing += latency;
        c.last_processed_at = Some(Utc::now());
    }

    pub fn record_failure(&self, latency: Duration) {
        let mut c = self.counters.lock();
        c.failed += 1;
        c.total_processing += latency;
        c.last_processed_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters.lock();
        let total = c.succeeded + c.failed;
        let success_rate = if total == 0 {
            "0%".to_string()
        } else {
            format!("{:.2}%", c.succeeded as f64 / total as f64 * 100.0)
        };
        let avg_processing_time_ms = if total == 0 {
            0
        } else {
            (c.total_processing.as_secs_f64() * 1000.0 / total as f64).round() as u64
        };

        MetricsSnapshot {
            worker: self.worker.clone(),
            succeeded: c.succeeded,
            failed: c.failed,
            total_processed: total,
            success_rate,
            avg_processing_time_ms,
            last_processed_at: c.last_processed_at,
        }
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

impl WorkerObserver for MetricsCollector {
    fn on_event(&self, _worker: &str, event: &WorkerEvent) {
        match event {
            WorkerEvent::Completed { latency, .. } => self.record_success(*latency),
            WorkerEvent::Failed { latency, .. } => self.record_failure(*latency),
            _ => {}
        }
    }
}

/// Collectors by worker name, for the metrics endpoint.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    collectors: DashMap<String, Arc<MetricsCollector>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collector for `worker`, created on first use.
    pub fn collector(&self, worker: &str) -> Arc<MetricsCollector> {
        self.collectors
            .entry(worker.to_string())
            .or_insert_with(|| Arc::new(MetricsCollector::new(worker)))
            .clone()
    }

    pub fn get(&self, worker: &str) -> Option<Arc<MetricsCollector>> {
        self.collectors.get(worker).map(|c| c.clone())
    }

    /// Snapshots ordered by worker name.
    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        let mut snapshots: Vec<MetricsSnapshot> =
            self.collectors.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.worker.cmp(&b.worker));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobId;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsCollector::new("email").snapshot();
        assert_eq!(snapshot.success_rate, "0%");
        assert_eq!(snapshot.total_processed, 0);
        assert_eq!(snapshot.avg_processing_time_ms, 0);
        assert!(snapshot.last_processed_at.is_none());
    }

    #[test]
    fn test_rate_and_average() {
        let collector = MetricsCollector::new("pdf");
        collector.record_success(Duration::from_millis(100));
        collector.record_success(Duration::from_millis(200));
        collector.record_failure(Duration::from_millis(300));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.total_processed, 3);
        assert_eq!(snapshot.success_rate, "66.67%");
        assert_eq!(snapshot.avg_processing_time_ms, 200);
        assert!(snapshot.last_processed_at.is_some());
    }

    #[test]
    fn test_observer_ignores_other_events() {
        let collector = MetricsCollector::new("email");
        collector.on_event("email", &WorkerEvent::Progress { job_id: JobId::new(), progress: 5 });
        collector.on_event(
            "email",
            &WorkerEvent::Failed {
                job_id: JobId::new(),
                job_name: "send-email".into(),
                reason: "smtp down".into(),
                attempts_made: 1,
                will_retry: true,
                latency: Duration::from_millis(10),
            },
        );
        assert_eq!(collector.snapshot().failed, 1);
        assert_eq!(collector.snapshot().success_rate, "0.00%");
    }

    #[test]
    fn test_registry_reuses_collectors() {
        let registry = MetricsRegistry::new();
        let a = registry.collector("email");
        a.record_success(Duration::from_millis(1));
        assert_eq!(registry.collector("email").snapshot().succeeded, 1);
        registry.collector("pdf");
        let names: Vec<String> = registry.snapshots().into_iter().map(|s| s.worker).collect();
        assert_eq!(names, vec!["email".to_string(), "pdf".to_string()]);
    }
}
