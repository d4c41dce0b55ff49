//! Document (PDF) generation handler.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{outcome, JobContext, JobHandler};
use crate::error::{ErrorCode, JobforgeError, Result};
use crate::jobs::job::JobOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Quote,
    Report,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [Self::Invoice, Self::Quote, Self::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Quote => "quote",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperFormat {
    A4,
    Letter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PaperFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<Margin>,
}

/// Payload of a `generate-pdf` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfPayload {
    #[serde(rename = "type")]
    pub document_type: DocumentType,
    pub document_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

impl PdfPayload {
    pub fn new(document_type: DocumentType, document_id: Uuid) -> Self {
        Self {
            document_type,
            document_id,
            user_id: None,
            organization_id: None,
            options: RenderOptions::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Renderer
// ═══════════════════════════════════════════════════════════════════════════════

/// Produces the document bytes. Layout and storage belong to the renderer.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, payload: &PdfPayload) -> Result<Vec<u8>>;
}

/// Rendering service reached over HTTP.
///
/// `POST {base_url}/render/{type}/{documentId}` with the payload as body;
/// the response body is the document.
#[derive(Debug, Clone)]
pub struct HttpDocumentRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentRenderer {
    /// Fails with `ConfigurationError` when no base URL is set.
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| JobforgeError::configuration("renderer.base_url is required for PDF generation"))?;
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            JobforgeError::with_internal(ErrorCode::ConfigurationError, "Failed to build renderer client", e.to_string())
        })?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl DocumentRenderer for HttpDocumentRenderer {
    async fn render(&self, payload: &PdfPayload) -> Result<Vec<u8>> {
        let url = format!(
            "{}/render/{}/{}",
            self.base_url, payload.document_type, payload.document_id
        );
        let response = self.client.post(&url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobforgeError::with_internal(
                ErrorCode::ExternalServiceError,
                "Document rendering failed",
                format!("status {}: {}", status, body),
            ));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// Handles `generate-pdf` jobs.
pub struct PdfHandler {
    renderer: Arc<dyn DocumentRenderer>,
}

impl PdfHandler {
    pub fn new(renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { renderer }
    }

    async fn generate(&self, ctx: &JobContext) -> Result<serde_json::Value> {
        let payload: PdfPayload = ctx.payload()?;
        tracing::debug!(
            job_id = %ctx.job().id,
            document_type = %payload.document_type,
            document_id = %payload.document_id,
            "Generating document"
        );

        progress(ctx, 10).await;
        let document = self.renderer.render(&payload).await?;
        progress(ctx, 100).await;

        Ok(serde_json::json!({
            "documentId": payload.document_id,
            "type": payload.document_type,
            "size": document.len(),
            "generatedAt": Utc::now().to_rfc3339(),
        }))
    }
}

/// Progress is advisory; a failed write never decides the attempt.
async fn progress(ctx: &JobContext, percent: u8) {
    if let Err(e) = ctx.report_progress(percent).await {
        tracing::warn!(job_id = %ctx.job().id, progress = percent, error = %e, "Progress update failed");
    }
}

#[async_trait]
impl JobHandler for PdfHandler {
    fn name(&self) -> &str {
        "pdf"
    }

    async fn handle(&self, ctx: &JobContext) -> JobOutcome {
        outcome(self.generate(ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobOptions;
    use crate::jobs::queue::{InMemoryQueueBackend, QueueBackend, QueueSettings};
    use serde_json::json;

    struct FixedRenderer(usize);

    #[async_trait]
    impl DocumentRenderer for FixedRenderer {
        async fn render(&self, _payload: &PdfPayload) -> Result<Vec<u8>> {
            Ok(vec![0u8; self.0])
        }
    }

    struct BrokenRenderer;

    #[async_trait]
    impl DocumentRenderer for BrokenRenderer {
        async fn render(&self, _payload: &PdfPayload) -> Result<Vec<u8>> {
            Err(JobforgeError::new(ErrorCode::ExternalServiceError, "renderer offline"))
        }
    }

    #[test]
    fn test_payload_shape() {
        let id = Uuid::new_v4();
        let payload: PdfPayload = serde_json::from_value(json!({
            "type": "invoice",
            "documentId": id,
            "options": {"format": "A4", "orientation": "landscape", "margin": {"top": "1cm"}}
        }))
        .unwrap();
        assert_eq!(payload.document_type, DocumentType::Invoice);
        assert_eq!(payload.options.format, Some(PaperFormat::A4));
        assert_eq!(payload.options.orientation, Some(Orientation::Landscape));
    }

    #[test]
    fn test_http_renderer_requires_base_url() {
        let err = HttpDocumentRenderer::new(None, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn test_generate_reports_size_and_progress() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueueBackend::new("pdf", QueueSettings::default()));
        let id = Uuid::new_v4();
        let job = queue
            .enqueue("generate-pdf", json!({"type": "quote", "documentId": id}), JobOptions::default())
            .await
            .unwrap();
        let handler = PdfHandler::new(Arc::new(FixedRenderer(2048)));

        match handler.handle(&JobContext::new(job.clone(), queue.clone())).await {
            JobOutcome::Success(data) => {
                assert_eq!(data["documentId"], json!(id));
                assert_eq!(data["type"], "quote");
                assert_eq!(data["size"], 2048);
                assert!(data["generatedAt"].is_string());
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(queue.get(job.id).await.unwrap().unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_progress_write_failure_does_not_fail_render() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueueBackend::new("pdf", QueueSettings::default()));
        let job = queue
            .enqueue("generate-pdf", json!({"type": "invoice", "documentId": Uuid::new_v4()}), JobOptions::default())
            .await
            .unwrap();
        // Gone from the store, so every progress write errors.
        queue.remove(job.id).await.unwrap();
        let handler = PdfHandler::new(Arc::new(FixedRenderer(512)));

        match handler.handle(&JobContext::new(job, queue)).await {
            JobOutcome::Success(data) => assert_eq!(data["size"], 512),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_renderer_error_becomes_failure() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueueBackend::new("pdf", QueueSettings::default()));
        let job = queue
            .enqueue("generate-pdf", json!({"type": "report", "documentId": Uuid::new_v4()}), JobOptions::default())
            .await
            .unwrap();
        let handler = PdfHandler::new(Arc::new(BrokenRenderer));

        match handler.handle(&JobContext::new(job, queue)).await {
            JobOutcome::Failure(reason) => assert!(reason.contains("renderer offline")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
