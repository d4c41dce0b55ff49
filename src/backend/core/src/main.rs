//! Jobforge Server - Main entry point
//!
//! Serves the HTTP API and runs the email and PDF workers in the same process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jobforge_core::{
    api::{self, AppState},
    config::{Config, MailProvider, QueueBackendKind},
    jobs::{
        handlers::{
            EmailHandler, HttpDocumentRenderer, HttpMailTransport, LogMailTransport, MailTransport,
            PdfHandler,
        },
        start_purge_task, InMemoryQueueFactory, JobHandler, JobWorker, MetricsRegistry,
        QueueFactory, QueueName, QueueRegistry, RedisQueueFactory, TracingObserver, WorkerSet,
    },
    middleware::{rate_limit, Authenticator, RateLimiter},
    observability,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("JOBFORGE_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };
    config.validate()?;

    // Initialize observability
    observability::init(&config.observability)?;
    let prometheus = observability::install_prometheus(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.queue.backend,
        "Starting Jobforge Server"
    );

    // Queue backend
    let factory: Arc<dyn QueueFactory> = match config.queue.backend {
        QueueBackendKind::Redis => {
            let url = config.redis.connection_url();
            let factory = RedisQueueFactory::connect(&url, &config.redis.key_prefix).await?;
            tracing::info!(prefix = %config.redis.key_prefix, "Connected to Redis");
            Arc::new(factory)
        }
        QueueBackendKind::Memory => {
            tracing::warn!("Using the in-memory queue backend; jobs do not survive a restart");
            Arc::new(InMemoryQueueFactory)
        }
    };
    let registry = Arc::new(QueueRegistry::new(factory, config.queue.settings()));
    let metrics = Arc::new(MetricsRegistry::new());

    // Workers
    let workers = if config.workers.enabled {
        start_workers(&config, &registry, &metrics)?
    } else {
        tracing::info!("Workers disabled; serving the API only");
        WorkerSet::new()
    };

    // Background maintenance
    let maintenance = vec![
        start_purge_task(registry.clone(), config.queue.purge_grace),
        observability::spawn_queue_gauges(registry.clone(), Duration::from_secs(15)),
    ];

    // HTTP
    let authenticator = Arc::new(Authenticator::new(config.auth.clone())?);
    let submission_limiter = Arc::new(RateLimiter::new(config.submission.clone()));
    let cleanup = rate_limit::start_cleanup_task(submission_limiter.clone(), config.submission.window);

    let mut app_state = AppState::new(registry.clone(), metrics, authenticator, submission_limiter);
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }
    let app = api::build_router(app_state, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    cleanup.abort();
    for task in maintenance {
        task.abort();
    }
    if let Err(e) = workers.close_all().await {
        tracing::error!(error = %e, "Workers did not stop cleanly");
    }
    if let Err(e) = registry.close_all().await {
        tracing::error!(error = %e, "Failed to close queues");
    }
    observability::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

fn start_workers(
    config: &Config,
    registry: &QueueRegistry,
    metrics: &MetricsRegistry,
) -> anyhow::Result<WorkerSet> {
    let transport: Arc<dyn MailTransport> = match config.mail.provider {
        MailProvider::Http => Arc::new(HttpMailTransport::new(
            config.mail.endpoint.clone(),
            config.mail.api_key.clone(),
            config.mail.timeout,
        )?),
        MailProvider::Log => Arc::new(LogMailTransport),
    };
    let renderer = HttpDocumentRenderer::new(config.renderer.base_url.clone(), config.renderer.timeout)?;

    let email_handler: Arc<dyn JobHandler> = Arc::new(EmailHandler::new(transport, config.mail.from.clone()));
    let pdf_handler: Arc<dyn JobHandler> = Arc::new(PdfHandler::new(Arc::new(renderer)));
    let lanes = [
        (QueueName::Email, email_handler, config.workers.email_rate_limit),
        (QueueName::Pdf, pdf_handler, config.workers.pdf_rate_limit),
    ];

    let mut workers = WorkerSet::new();
    for (lane, handler, rate_limit) in lanes {
        let name = format!("{}-worker", lane);
        let worker_config = config.workers.worker(&name, rate_limit, &config.queue);
        let handle = JobWorker::new(worker_config, registry.queue(lane.as_str()), handler)
            .with_observer(metrics.collector(&name))
            .with_observer(Arc::new(TracingObserver))
            .start();
        workers.push(handle);
    }

    tracing::info!(workers = ?workers.names(), "Workers started");
    Ok(workers)
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
