//! Worker behaviour against the in-memory backend.
//!
//! Tests cover:
//! - Retry with backoff until success
//! - Priority order with a single slot
//! - Concurrency bound
//! - Stalled job recovery
//! - Handler panics
//! - Claim rate limiting
//! - Graceful close

use jobforge_core::jobs::{
    from_fn, BackoffPolicy, InMemoryQueueBackend, JobId, JobOptions, JobOutcome, JobRecord,
    JobStatus, JobWorker, QueueBackend, QueueSettings, RateLimit, WorkerConfig, WorkerEvent,
    WorkerObserver,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Helpers
// ============================================================================

fn queue(max_attempts: u32) -> Arc<InMemoryQueueBackend> {
    Arc::new(InMemoryQueueBackend::new(
        "email",
        QueueSettings {
            max_attempts,
            backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
            ..QueueSettings::default()
        },
    ))
}

fn config(name: &str) -> WorkerConfig {
    WorkerConfig {
        claim_backoff: Duration::from_millis(10),
        ..WorkerConfig::new(name)
    }
    .with_poll_interval(Duration::from_millis(10))
    .with_stalled_interval(Duration::from_millis(25))
    .with_shutdown_timeout(Duration::from_secs(2))
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<WorkerEvent>>,
}

impl Recorder {
    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind()).collect()
    }
}

impl WorkerObserver for Recorder {
    fn on_event(&self, _worker: &str, event: &WorkerEvent) {
        self.events.lock().push(event.clone());
    }
}

async fn wait_for_status(queue: &dyn QueueBackend, id: JobId, status: JobStatus) -> JobRecord {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = queue.get(id).await.unwrap().unwrap();
        if job.status == status {
            return job;
        }
        assert!(Instant::now() < deadline, "job {} stuck in {}", id, job.status);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_fail_fail_succeed_completes_on_third_attempt() {
    let q = queue(3);
    let job = q.enqueue("send-email", json!({}), JobOptions::default()).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let handler = {
        let calls = calls.clone();
        from_fn("flaky", move |_job: JobRecord| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    JobOutcome::failure("smtp timeout")
                } else {
                    JobOutcome::success(json!({ "messageId": "m-1" }))
                }
            }
        })
    };

    let recorder = Arc::new(Recorder::default());
    let handle = JobWorker::new(config("email-worker"), q.clone(), Arc::new(handler))
        .with_observer(recorder.clone())
        .start();

    let done = wait_for_status(q.as_ref(), job.id, JobStatus::Completed).await;
    handle.close().await.unwrap();

    assert_eq!(done.attempts_made, 3);
    assert_eq!(done.result, Some(json!({ "messageId": "m-1" })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.kinds(), vec!["failed", "failed", "completed"]);

    let events = recorder.events.lock();
    for event in events.iter().take(2) {
        match event {
            WorkerEvent::Failed { will_retry, reason, .. } => {
                assert!(*will_retry);
                assert_eq!(reason, "smtp timeout");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_exhausted_attempts_fail_once() {
    let q = queue(2);
    let job = q.enqueue("send-email", json!({}), JobOptions::default()).await.unwrap();
    let handler = from_fn("broken", |_job: JobRecord| async { JobOutcome::failure("bounced") });

    let recorder = Arc::new(Recorder::default());
    let handle = JobWorker::new(config("email-worker"), q.clone(), Arc::new(handler))
        .with_observer(recorder.clone())
        .start();

    let failed = wait_for_status(q.as_ref(), job.id, JobStatus::Failed).await;
    handle.close().await.unwrap();

    assert_eq!(failed.attempts_made, 2);
    assert_eq!(failed.failure_reason.as_deref(), Some("bounced"));
    assert!(failed.finished_at.is_some());

    let terminal: Vec<bool> = recorder
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Failed { will_retry, .. } => Some(*will_retry),
            _ => None,
        })
        .collect();
    assert_eq!(terminal, vec![true, false]);
}

// ============================================================================
// Ordering and Concurrency
// ============================================================================

#[tokio::test]
async fn test_higher_priority_processed_first() {
    let q = queue(1);
    let low = q.enqueue("b", json!("B"), JobOptions::new().with_priority(2)).await.unwrap();
    let high = q.enqueue("a", json!("A"), JobOptions::new().with_priority(1)).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        from_fn("order", move |job: JobRecord| {
            let seen = seen.clone();
            async move {
                seen.lock().push(job.name.clone());
                JobOutcome::success(json!(null))
            }
        })
    };

    let handle = JobWorker::new(config("order").with_concurrency(1), q.clone(), Arc::new(handler)).start();
    wait_for_status(q.as_ref(), low.id, JobStatus::Completed).await;
    wait_for_status(q.as_ref(), high.id, JobStatus::Completed).await;
    handle.close().await.unwrap();

    assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_concurrency_never_exceeded() {
    let q = queue(1);
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(q.enqueue(&format!("job-{}", i), json!(i), JobOptions::default()).await.unwrap().id);
    }

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handler = {
        let (running, peak) = (running.clone(), peak.clone());
        from_fn("slow", move |_job: JobRecord| {
            let (running, peak) = (running.clone(), peak.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(40)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                JobOutcome::success(json!(null))
            }
        })
    };

    let handle = JobWorker::new(config("pool").with_concurrency(2), q.clone(), Arc::new(handler)).start();
    for id in &ids {
        wait_for_status(q.as_ref(), *id, JobStatus::Completed).await;
    }
    let stats = handle.stats().clone();
    handle.close().await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(stats.succeeded(), 6);
    assert_eq!(stats.active(), 0);
}

// ============================================================================
// Failure Modes
// ============================================================================

#[tokio::test]
async fn test_stalled_job_is_reclaimed_and_finished() {
    let q = queue(3);
    let job = q.enqueue("orphan", json!({}), JobOptions::default()).await.unwrap();

    // A worker that claims and then disappears.
    q.claim_next("vanished", Duration::from_millis(20)).await.unwrap().unwrap();

    let recorder = Arc::new(Recorder::default());
    let handler = from_fn("rescue", |_job: JobRecord| async { JobOutcome::success(json!("ok")) });
    let handle = JobWorker::new(config("rescue"), q.clone(), Arc::new(handler))
        .with_observer(recorder.clone())
        .start();

    let done = wait_for_status(q.as_ref(), job.id, JobStatus::Completed).await;
    handle.close().await.unwrap();

    // One attempt consumed by the stall, one by the successful run.
    assert_eq!(done.attempts_made, 2);
    let kinds = recorder.kinds();
    assert_eq!(kinds.first(), Some(&"stalled"));
    assert_eq!(kinds.last(), Some(&"completed"));
}

#[tokio::test]
async fn test_handler_panic_is_a_failure() {
    let q = queue(1);
    let job = q.enqueue("explode", json!({}), JobOptions::default()).await.unwrap();
    let handler = from_fn("panicky", |job: JobRecord| async move {
        if job.attempts_made < 100 {
            panic!("renderer exploded");
        }
        JobOutcome::success(json!(null))
    });

    let handle = JobWorker::new(config("panicky"), q.clone(), Arc::new(handler)).start();
    let failed = wait_for_status(q.as_ref(), job.id, JobStatus::Failed).await;

    // The worker survives the panic and keeps claiming.
    let next = q.enqueue("after", json!({}), JobOptions::default()).await.unwrap();
    wait_for_status(q.as_ref(), next.id, JobStatus::Failed).await;
    handle.close().await.unwrap();

    let reason = failed.failure_reason.unwrap();
    assert!(reason.contains("renderer exploded"), "{}", reason);
}

// ============================================================================
// Rate Limiting and Shutdown
// ============================================================================

#[tokio::test]
async fn test_claim_rate_limit_spaces_jobs() {
    let q = queue(1);
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(q.enqueue(&format!("job-{}", i), json!(i), JobOptions::default()).await.unwrap().id);
    }

    let handler = from_fn("fast", |_job: JobRecord| async { JobOutcome::success(json!(null)) });
    let worker = config("limited")
        .with_concurrency(4)
        .with_rate_limit(RateLimit::new(2, Duration::from_millis(300)));
    let handle = JobWorker::new(worker, q.clone(), Arc::new(handler)).start();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(q.stats().await.unwrap().completed, 2);

    for id in &ids {
        wait_for_status(q.as_ref(), *id, JobStatus::Completed).await;
    }
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_close_waits_for_in_flight_job() {
    let q = queue(1);
    let job = q.enqueue("long", json!({}), JobOptions::default()).await.unwrap();
    let handler = from_fn("long", |_job: JobRecord| async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        JobOutcome::success(json!("done"))
    });

    let handle = JobWorker::new(config("long"), q.clone(), Arc::new(handler)).start();
    wait_for_status(q.as_ref(), job.id, JobStatus::Active).await;
    handle.close().await.unwrap();

    let finished = q.get(job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_paused_queue_is_not_consumed() {
    let q = queue(1);
    q.pause().await.unwrap();
    let job = q.enqueue("held", json!({}), JobOptions::default()).await.unwrap();

    let handler = from_fn("idle", |_job: JobRecord| async { JobOutcome::success(json!(null)) });
    let handle = JobWorker::new(config("idle"), q.clone(), Arc::new(handler)).start();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(q.get(job.id).await.unwrap().unwrap().status, JobStatus::Waiting);

    q.resume().await.unwrap();
    wait_for_status(q.as_ref(), job.id, JobStatus::Completed).await;
    handle.close().await.unwrap();
}
