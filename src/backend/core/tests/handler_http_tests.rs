//! Email and PDF handlers against mocked HTTP providers.

use jobforge_core::jobs::handlers::{
    EmailHandler, EmailPayload, EmailTemplate, HttpDocumentRenderer, HttpMailTransport, PdfHandler,
    PdfPayload, DocumentType,
};
use jobforge_core::jobs::{
    InMemoryQueueBackend, JobContext, JobHandler, JobOptions, JobOutcome, QueueBackend,
    QueueSettings,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn claimed(queue: &Arc<InMemoryQueueBackend>, name: &str, payload: Value) -> JobContext {
    queue.enqueue(name, payload, JobOptions::default()).await.unwrap();
    let job = queue
        .claim_next("test-worker", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    JobContext::new(job, queue.clone())
}

fn queue(name: &str) -> Arc<InMemoryQueueBackend> {
    Arc::new(InMemoryQueueBackend::new(name, QueueSettings::default()))
}

// ============================================================================
// Mail Provider
// ============================================================================

#[tokio::test]
async fn test_email_delivered_with_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "to": "ada@example.com",
            "from": "noreply@example.com",
            "template": "WELCOME",
            "variables": {"name": "Ada"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-123"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpMailTransport::new(
        format!("{}/emails", server.uri()),
        Some("test-key".to_string()),
        TIMEOUT,
    )
    .unwrap();
    let handler = EmailHandler::new(Arc::new(transport), "noreply@example.com");

    let payload = EmailPayload::new("ada@example.com", EmailTemplate::Welcome).with_data("name", json!("Ada"));
    let ctx = claimed(&queue("email"), "send-email", serde_json::to_value(&payload).unwrap()).await;

    match handler.handle(&ctx).await {
        JobOutcome::Success(result) => assert_eq!(result, json!({"messageId": "msg-123"})),
        JobOutcome::Failure(reason) => panic!("unexpected failure: {}", reason),
    }
}

#[tokio::test]
async fn test_email_provider_error_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let transport = HttpMailTransport::new(server.uri(), Some("test-key".to_string()), TIMEOUT).unwrap();
    let handler = EmailHandler::new(Arc::new(transport), "noreply@example.com");
    let payload = EmailPayload::new("ada@example.com", EmailTemplate::InvoiceReminder);
    let ctx = claimed(&queue("email"), "send-email", serde_json::to_value(&payload).unwrap()).await;

    match handler.handle(&ctx).await {
        JobOutcome::Failure(reason) => {
            assert!(reason.contains("Mail provider rejected the message"), "{}", reason);
            assert!(reason.contains("503"), "{}", reason);
        }
        JobOutcome::Success(result) => panic!("unexpected success: {}", result),
    }
}

// ============================================================================
// Document Renderer
// ============================================================================

#[tokio::test]
async fn test_pdf_rendered_and_progress_persisted() {
    let server = MockServer::start().await;
    let document_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path(format!("/render/invoice/{}", document_id)))
        .and(body_partial_json(json!({"type": "invoice", "documentId": document_id})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'%'; 2048]))
        .expect(1)
        .mount(&server)
        .await;

    let renderer = HttpDocumentRenderer::new(Some(format!("{}/", server.uri())), TIMEOUT).unwrap();
    let handler = PdfHandler::new(Arc::new(renderer));

    let q = queue("pdf");
    let payload = PdfPayload::new(DocumentType::Invoice, document_id);
    let ctx = claimed(&q, "generate-pdf", serde_json::to_value(&payload).unwrap()).await;

    match handler.handle(&ctx).await {
        JobOutcome::Success(result) => {
            assert_eq!(result["documentId"], json!(document_id));
            assert_eq!(result["type"], "invoice");
            assert_eq!(result["size"], 2048);
            assert!(result["generatedAt"].is_string());
        }
        JobOutcome::Failure(reason) => panic!("unexpected failure: {}", reason),
    }

    let stored = q.get(ctx.job().id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 100);
}

#[tokio::test]
async fn test_pdf_renderer_error_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("template missing"))
        .mount(&server)
        .await;

    let renderer = HttpDocumentRenderer::new(Some(server.uri()), TIMEOUT).unwrap();
    let handler = PdfHandler::new(Arc::new(renderer));
    let payload = PdfPayload::new(DocumentType::Report, Uuid::new_v4());
    let ctx = claimed(&queue("pdf"), "generate-pdf", serde_json::to_value(&payload).unwrap()).await;

    match handler.handle(&ctx).await {
        JobOutcome::Failure(reason) => assert!(reason.contains("template missing"), "{}", reason),
        JobOutcome::Success(result) => panic!("unexpected success: {}", result),
    }
}
