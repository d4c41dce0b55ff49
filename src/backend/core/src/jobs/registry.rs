//! Queue registry: one place that maps queue names to backends.
//!
//! Queues are created lazily on first reference with the registry's default
//! settings. Construct one registry at startup and pass it around; tests
//! build their own.

use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::handlers::{EmailPayload, PdfPayload};
use super::job::{JobId, JobOptions, JobRecord, NewJob};
use super::queue::{QueueBackend, QueueFactory, QueueSettings, QueueStats};
use crate::error::{JobforgeError, Result};

/// The lanes this system ships handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Email,
    Pdf,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [Self::Email, Self::Pdf];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Pdf => "pdf",
        }
    }

    /// Job name used for single submissions on this lane.
    pub fn job_name(&self) -> &'static str {
        match self {
            Self::Email => "send-email",
            Self::Pdf => "generate-pdf",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = JobforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "email" => Ok(Self::Email),
            "pdf" => Ok(Self::Pdf),
            other => Err(JobforgeError::queue_not_found(other)),
        }
    }
}

/// Name → queue map with lazy creation.
pub struct QueueRegistry {
    factory: Arc<dyn QueueFactory>,
    defaults: QueueSettings,
    queues: DashMap<String, Arc<dyn QueueBackend>>,
}

impl QueueRegistry {
    pub fn new(factory: Arc<dyn QueueFactory>, defaults: QueueSettings) -> Self {
        Self {
            factory,
            defaults,
            queues: DashMap::new(),
        }
    }

    pub fn defaults(&self) -> &QueueSettings {
        &self.defaults
    }

    /// The queue called `name`, created on first reference.
    pub fn queue(&self, name: &str) -> Arc<dyn QueueBackend> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(queue = %name, "Queue created");
                self.factory.create(name, self.defaults)
            })
            .clone()
    }

    /// Names of every queue created so far, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub async fn add_job(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobRecord> {
        let job = self.queue(queue).enqueue(job_name, payload, options).await?;
        counter!("jobforge_jobs_enqueued_total", "queue" => queue.to_string()).increment(1);
        tracing::info!(queue = %queue, job_id = %job.id, job_name = %job.name, "Job added");
        Ok(job)
    }

    pub async fn add_bulk(&self, queue: &str, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>> {
        let records = self.queue(queue).enqueue_bulk(jobs).await?;
        counter!("jobforge_jobs_enqueued_total", "queue" => queue.to_string()).increment(records.len() as u64);
        tracing::info!(queue = %queue, count = records.len(), "Jobs added in bulk");
        Ok(records)
    }

    /// Fetch a job, failing with `JobNotFound` when absent.
    pub async fn get_job(&self, queue: &str, job_id: JobId) -> Result<JobRecord> {
        self.queue(queue)
            .get(job_id)
            .await?
            .ok_or_else(|| JobforgeError::job_not_found(queue, job_id))
    }

    pub async fn remove_job(&self, queue: &str, job_id: JobId) -> Result<()> {
        self.queue(queue).remove(job_id).await?;
        tracing::info!(queue = %queue, job_id = %job_id, "Job removed");
        Ok(())
    }

    pub async fn stats(&self, queue: &str) -> Result<QueueStats> {
        self.queue(queue).stats().await
    }

    /// Stats for the known lanes plus any other queue created so far.
    pub async fn stats_all(&self) -> Result<BTreeMap<String, QueueStats>> {
        let mut names: Vec<String> = QueueName::ALL.iter().map(|q| q.as_str().to_string()).collect();
        for name in self.queue_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let mut all = BTreeMap::new();
        for name in names {
            let stats = self.stats(&name).await?;
            all.insert(name, stats);
        }
        Ok(all)
    }

    pub async fn pause(&self, queue: &str) -> Result<()> {
        self.queue(queue).pause().await?;
        tracing::info!(queue = %queue, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> Result<()> {
        self.queue(queue).resume().await?;
        tracing::info!(queue = %queue, "Queue resumed");
        Ok(())
    }

    pub async fn purge(&self, queue: &str, grace: Duration) -> Result<u64> {
        let removed = self.queue(queue).purge(grace).await?;
        tracing::info!(queue = %queue, removed, grace_ms = grace.as_millis() as u64, "Queue purged");
        Ok(removed)
    }

    pub async fn drain(&self, queue: &str, include_delayed: bool) -> Result<u64> {
        let removed = self.queue(queue).drain(include_delayed).await?;
        tracing::info!(queue = %queue, removed, include_delayed, "Queue drained");
        Ok(removed)
    }

    /// Broker liveness, checked through the email lane.
    pub async fn ping(&self) -> Result<()> {
        self.queue(QueueName::Email.as_str()).ping().await
    }

    /// Close every queue and forget them.
    pub async fn close_all(&self) -> Result<()> {
        let queues: Vec<Arc<dyn QueueBackend>> = self.queues.iter().map(|e| e.value().clone()).collect();
        for queue in queues {
            queue.close().await?;
        }
        self.queues.clear();
        tracing::info!("All queues closed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lane helpers
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn queue_email(&self, payload: &EmailPayload, options: JobOptions) -> Result<JobRecord> {
        let lane = QueueName::Email;
        self.add_job(lane.as_str(), lane.job_name(), serde_json::to_value(payload)?, options)
            .await
    }

    pub async fn queue_pdf(&self, payload: &PdfPayload, options: JobOptions) -> Result<JobRecord> {
        let lane = QueueName::Pdf;
        self.add_job(lane.as_str(), lane.job_name(), serde_json::to_value(payload)?, options)
            .await
    }

    /// Admit a batch of emails atomically, named `send-email-{index}`.
    pub async fn queue_email_batch(&self, entries: Vec<(EmailPayload, JobOptions)>) -> Result<Vec<JobRecord>> {
        let jobs = entries
            .into_iter()
            .enumerate()
            .map(|(index, (payload, options))| {
                Ok(NewJob::new(format!("send-email-{}", index), serde_json::to_value(payload)?)
                    .with_options(options))
            })
            .collect::<Result<Vec<_>>>()?;
        self.add_bulk(QueueName::Email.as_str(), jobs).await
    }
}

/// Purge finished jobs older than `grace` from every known lane, once per
/// `grace`.
pub fn start_purge_task(registry: Arc<QueueRegistry>, grace: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = grace.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            for lane in QueueName::ALL {
                if let Err(e) = registry.purge(lane.as_str(), grace).await {
                    tracing::warn!(queue = %lane, error = %e, "Scheduled purge failed");
                }
            }
        }
    })
}
