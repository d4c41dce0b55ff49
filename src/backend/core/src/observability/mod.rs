//! Observability: structured logging, distributed tracing and Prometheus metrics.

use std::sync::Arc;
use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;
use crate::jobs::QueueRegistry;

/// Latency buckets for job durations, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Spans are exported over OTLP
/// when an endpoint is configured.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = if config.json_logging {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().pretty().boxed()
    };

    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
                        ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Flush and shut down the OpenTelemetry pipeline.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Install the global Prometheus recorder.
///
/// Returns `None` when disabled. Only one recorder can be installed per
/// process.
pub fn install_prometheus(config: &ObservabilityConfig) -> anyhow::Result<Option<PrometheusHandle>> {
    if !config.prometheus {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets(DURATION_BUCKETS)?
        .install_recorder()?;

    describe_metrics();
    tracing::info!(service = %config.service_name, "Prometheus recorder installed");

    Ok(Some(handle))
}

/// Register descriptions for every metric the engine emits.
pub fn describe_metrics() {
    describe_counter!("jobforge_jobs_enqueued_total", "Jobs added to a queue");
    describe_counter!("jobforge_jobs_completed_total", "Jobs that completed successfully");
    describe_counter!("jobforge_jobs_failed_total", "Jobs that failed permanently");
    describe_counter!("jobforge_jobs_retried_total", "Failed attempts scheduled for retry");
    describe_counter!("jobforge_jobs_stalled_total", "Jobs reclaimed after their lock expired");
    describe_counter!("jobforge_rate_limited_total", "Claims or submissions deferred by a rate limit");
    describe_counter!("jobforge_auth_success_total", "Successful admin authentications");
    describe_counter!("jobforge_auth_failures_total", "Rejected admin authentications");
    describe_counter!("jobforge_errors_total", "Errors returned by the HTTP API");

    describe_histogram!("jobforge_job_duration_seconds", "Handler execution time per attempt");

    describe_gauge!("jobforge_queue_jobs", "Jobs per queue and state");
}

/// Publish queue depths as gauges every `interval`.
pub fn spawn_queue_gauges(registry: Arc<QueueRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let all = match registry.stats_all().await {
                Ok(all) => all,
                Err(e) => {
                    tracing::debug!(error = %e, "Queue depth sampling failed");
                    continue;
                }
            };
            for (queue, stats) in all {
                let states = [
                    ("waiting", stats.waiting),
                    ("active", stats.active),
                    ("delayed", stats.delayed),
                    ("completed", stats.completed),
                    ("failed", stats.failed),
                ];
                for (state, count) in states {
                    gauge!("jobforge_queue_jobs", "queue" => queue.clone(), "state" => state)
                        .set(count as f64);
                }
            }
        }
    })
}
