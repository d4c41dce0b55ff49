//! Job handlers.
//!
//! A handler runs one attempt of a job and reports a [`JobOutcome`]. It never
//! touches queue state directly; the worker turns the outcome into the
//! complete/retry transition.

pub mod email;
pub mod pdf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

use super::events::{WorkerEvent, WorkerObserver};
use super::job::{JobOutcome, JobRecord};
use super::queue::QueueBackend;
use crate::error::{JobforgeError, Result};

pub use email::{EmailHandler, EmailPayload, EmailTemplate, HttpMailTransport, LogMailTransport, MailTransport};
pub use pdf::{DocumentRenderer, DocumentType, HttpDocumentRenderer, PdfHandler, PdfPayload};

/// Processes jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handler name, used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &JobContext) -> JobOutcome;
}

/// What a handler sees of the job it is running.
pub struct JobContext {
    job: JobRecord,
    queue: Arc<dyn QueueBackend>,
    worker: String,
    observers: Arc<Vec<Arc<dyn WorkerObserver>>>,
}

impl JobContext {
    pub fn new(job: JobRecord, queue: Arc<dyn QueueBackend>) -> Self {
        Self {
            job,
            queue,
            worker: String::new(),
            observers: Arc::new(Vec::new()),
        }
    }

    pub(crate) fn with_observers(
        mut self,
        worker: impl Into<String>,
        observers: Arc<Vec<Arc<dyn WorkerObserver>>>,
    ) -> Self {
        self.worker = worker.into();
        self.observers = observers;
        self
    }

    pub fn job(&self) -> &JobRecord {
        &self.job
    }

    /// Decode the payload into the handler's own type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.job.payload.clone()).map_err(|e| {
            JobforgeError::validation(format!("Invalid payload for job '{}': {}", self.job.name, e))
        })
    }

    /// Persist progress (clamped to 100) and notify observers.
    pub async fn report_progress(&self, progress: u8) -> Result<()> {
        let progress = progress.min(100);
        self.queue.update_progress(self.job.id, progress).await?;
        let event = WorkerEvent::Progress {
            job_id: self.job.id,
            progress,
        };
        for observer in self.observers.iter() {
            observer.on_event(&self.worker, &event);
        }
        Ok(())
    }
}

/// Map a handler's internal result onto an outcome, keeping the internal
/// detail in the failure reason.
pub(crate) fn outcome(result: Result<serde_json::Value>) -> JobOutcome {
    match result {
        Ok(data) => JobOutcome::Success(data),
        Err(e) => match e.internal_message() {
            Some(detail) => JobOutcome::Failure(format!("{}: {}", e.user_message(), detail)),
            None => JobOutcome::Failure(e.user_message().to_string()),
        },
    }
}

/// Handler built from an async closure over the claimed record.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a [`JobHandler`].
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = JobOutcome> + Send,
{
    FnHandler { name: name.into(), f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = JobOutcome> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &JobContext) -> JobOutcome {
        (self.f)(ctx.job().clone()).await
    }
}
