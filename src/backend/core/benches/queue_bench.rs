//! Benchmarks for the in-memory queue backend and submission validation.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jobforge_core::jobs::{InMemoryQueueBackend, JobOptions, NewJob, QueueBackend, QueueSettings};
use jobforge_core::submission::{self, SubmitRequest};
use serde_json::json;
use std::time::Duration;

const LOCK: Duration = Duration::from_secs(30);

fn backend() -> InMemoryQueueBackend {
    InMemoryQueueBackend::new("bench", QueueSettings::default())
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let q = backend();
    let payload = json!({"to": "ada@example.com", "template": "WELCOME", "data": {}});
    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        b.iter(|| rt.block_on(async { black_box(q.enqueue("send-email", payload.clone(), JobOptions::default()).await.unwrap()) }));
    });
    group.bench_function("prioritized", |b| {
        let mut p = 0u32;
        b.iter(|| {
            p = (p + 1) % 10;
            rt.block_on(async { black_box(q.enqueue("send-email", payload.clone(), JobOptions::new().with_priority(p)).await.unwrap()) })
        });
    });
    for size in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("bulk", size), &size, |b, &n| {
            b.iter(|| {
                let jobs: Vec<NewJob> = (0..n).map(|i| NewJob::new("send-email", json!({"n": i}))).collect();
                rt.block_on(async { black_box(q.enqueue_bulk(jobs).await.unwrap()) })
            });
        });
    }
    group.finish();
}

fn bench_claim_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_claim_complete");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for depth in [100usize, 1_000, 10_000] {
        let q = backend();
        rt.block_on(async {
            let jobs: Vec<NewJob> = (0..depth)
                .map(|i| NewJob::new("generate-pdf", json!({"n": i})).with_options(JobOptions::new().with_priority((i % 10) as u32)))
                .collect();
            q.enqueue_bulk(jobs).await.unwrap();
        });
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("cycle", depth), &q, |b, q| {
            b.iter(|| {
                rt.block_on(async {
                    let job = q.claim_next("bench-worker", LOCK).await.unwrap().unwrap();
                    q.complete(job.id, "bench-worker", json!(null)).await.unwrap();
                    // Keep the depth steady.
                    black_box(q.enqueue(&job.name, job.payload, JobOptions::new().with_priority(job.priority)).await.unwrap())
                })
            });
        });
    }
    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_stats");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for depth in [100usize, 10_000] {
        let q = backend();
        rt.block_on(async {
            let jobs: Vec<NewJob> = (0..depth).map(|i| NewJob::new("send-email", json!({"n": i}))).collect();
            q.enqueue_bulk(jobs).await.unwrap();
        });
        group.bench_with_input(BenchmarkId::new("stats", depth), &q, |b, q| {
            b.iter(|| rt.block_on(async { black_box(q.stats().await.unwrap()) }));
        });
    }
    group.finish();
}

fn bench_submission_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("submission_validate");
    let valid: SubmitRequest = serde_json::from_value(json!({
        "type": "email",
        "payload": {"to": "ada@example.com", "template": "WELCOME", "data": {"name": "Ada"}},
        "options": {"priority": 3, "attempts": 2}
    }))
    .unwrap();
    let invalid: SubmitRequest = serde_json::from_value(json!({
        "type": "pdf",
        "payload": {"type": "memo", "documentId": "nope"},
        "options": {"priority": 42, "delay": -1}
    }))
    .unwrap();
    group.bench_function("valid_email", |b| { b.iter(|| black_box(submission::validate(valid.clone()))); });
    group.bench_function("invalid_pdf", |b| { b.iter(|| black_box(submission::validate(invalid.clone()))); });
    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_claim_complete, bench_stats, bench_submission_validation);
criterion_main!(benches);
