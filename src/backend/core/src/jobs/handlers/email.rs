//! Transactional email handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{outcome, JobContext, JobHandler};
use crate::error::{ErrorCode, JobforgeError, Result};
use crate::jobs::job::JobOutcome;

// ═══════════════════════════════════════════════════════════════════════════════
// Payload
// ═══════════════════════════════════════════════════════════════════════════════

/// Templates the mail collaborator knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailTemplate {
    Welcome,
    PasswordReset,
    EmailVerification,
    InvoiceReminder,
    PaymentReceived,
}

impl EmailTemplate {
    pub const ALL: [EmailTemplate; 5] = [
        Self::Welcome,
        Self::PasswordReset,
        Self::EmailVerification,
        Self::InvoiceReminder,
        Self::PaymentReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::EmailVerification => "EMAIL_VERIFICATION",
            Self::InvoiceReminder => "INVOICE_REMINDER",
            Self::PaymentReceived => "PAYMENT_RECEIVED",
        }
    }

    /// Subject used when the payload does not set one.
    pub fn default_subject(&self) -> &'static str {
        match self {
            Self::Welcome => "Welcome aboard",
            Self::PasswordReset => "Reset your password",
            Self::EmailVerification => "Verify your email address",
            Self::InvoiceReminder => "Invoice reminder",
            Self::PaymentReceived => "Payment received",
        }
    }
}

impl fmt::Display for EmailTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailTemplate {
    type Err = JobforgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobforgeError::validation(format!("Unknown email template '{}'", s)))
    }
}

/// One address or a list of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Only the first address of a list is delivered to.
    pub fn primary(&self) -> Option<&str> {
        match self {
            Self::One(to) => Some(to.as_str()),
            Self::Many(list) => list.first().map(String::as_str),
        }
    }

    pub fn all(&self) -> Vec<&str> {
        match self {
            Self::One(to) => vec![to.as_str()],
            Self::Many(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Base64 content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Payload of a `send-email` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: Recipients,
    pub template: EmailTemplate,
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl EmailPayload {
    pub fn new(to: impl Into<String>, template: EmailTemplate) -> Self {
        Self {
            to: Recipients::One(to.into()),
            template,
            data: serde_json::Map::new(),
            from: None,
            subject: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════════════

/// A message ready to hand to the mail provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub template: EmailTemplate,
    pub variables: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Delivers rendered messages. Rendering belongs to the provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the provider's message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderReply {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Mail provider reached over HTTPS with a bearer API key.
#[derive(Debug, Clone)]
pub struct HttpMailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpMailTransport {
    /// Fails with `ConfigurationError` when the key or endpoint is missing.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(JobforgeError::configuration("mail.endpoint is required for the http mail provider"));
        }
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| JobforgeError::configuration("mail.api_key is required for the http mail provider"))?;
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            JobforgeError::with_internal(ErrorCode::ConfigurationError, "Failed to build mail client", e.to_string())
        })?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobforgeError::with_internal(
                ErrorCode::ExternalServiceError,
                "Mail provider rejected the message",
                format!("status {}: {}", status, body),
            ));
        }

        let reply: ProviderReply = response.json().await.unwrap_or(ProviderReply {
            message_id: None,
            id: None,
        });
        Ok(reply.message_id.or(reply.id).unwrap_or_else(|| "sent".to_string()))
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        tracing::info!(
            to = %email.to,
            template = %email.template,
            subject = %email.subject,
            "Email delivery skipped (log transport)"
        );
        Ok(format!("log-{}", uuid::Uuid::new_v4()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// Handles `send-email` jobs.
pub struct EmailHandler {
    transport: Arc<dyn MailTransport>,
    default_from: String,
}

impl EmailHandler {
    pub fn new(transport: Arc<dyn MailTransport>, default_from: impl Into<String>) -> Self {
        Self {
            transport,
            default_from: default_from.into(),
        }
    }

    fn compose(&self, payload: EmailPayload) -> Result<OutgoingEmail> {
        let to = payload
            .to
            .primary()
            .filter(|to| !to.trim().is_empty())
            .ok_or_else(|| JobforgeError::validation("Email job has no recipient"))?
            .to_string();

        Ok(OutgoingEmail {
            to,
            from: payload.from.unwrap_or_else(|| self.default_from.clone()),
            subject: payload
                .subject
                .unwrap_or_else(|| payload.template.default_subject().to_string()),
            template: payload.template,
            variables: payload.data,
            attachments: payload.attachments,
        })
    }

    async fn deliver(&self, ctx: &JobContext) -> Result<serde_json::Value> {
        let email = self.compose(ctx.payload::<EmailPayload>()?)?;
        tracing::debug!(
            job_id = %ctx.job().id,
            template = %email.template,
            transport = self.transport.name(),
            "Sending email"
        );
        let message_id = self.transport.send(&email).await?;
        Ok(serde_json::json!({ "messageId": message_id }))
    }
}

#[async_trait]
impl JobHandler for EmailHandler {
    fn name(&self) -> &str {
        "email"
    }

    async fn handle(&self, ctx: &JobContext) -> JobOutcome {
        outcome(self.deliver(ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobOptions;
    use crate::jobs::queue::{InMemoryQueueBackend, QueueBackend, QueueSettings};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct CapturingTransport {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl MailTransport for CapturingTransport {
        fn name(&self) -> &str {
            "capture"
        }

        async fn send(&self, email: &OutgoingEmail) -> Result<String> {
            self.sent.lock().push(email.clone());
            Ok("msg-1".to_string())
        }
    }

    async fn context(payload: serde_json::Value) -> JobContext {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueueBackend::new("email", QueueSettings::default()));
        let job = queue.enqueue("send-email", payload, JobOptions::default()).await.unwrap();
        JobContext::new(job, queue)
    }

    #[test]
    fn test_template_parse() {
        assert_eq!("INVOICE_REMINDER".parse::<EmailTemplate>().unwrap(), EmailTemplate::InvoiceReminder);
        assert!("NEWSLETTER".parse::<EmailTemplate>().is_err());
    }

    #[test]
    fn test_http_transport_requires_api_key() {
        let err = HttpMailTransport::new("https://mail.example.com/send", None, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert!(HttpMailTransport::new("https://mail.example.com/send", Some("k".into()), Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_first_recipient_and_defaults() {
        let transport = Arc::new(CapturingTransport::default());
        let handler = EmailHandler::new(transport.clone(), "billing@example.com");
        let ctx = context(json!({
            "to": ["first@example.com", "second@example.com"],
            "template": "WELCOME",
            "data": {"name": "Ada"}
        }))
        .await;

        let outcome = handler.handle(&ctx).await;
        assert_eq!(outcome, JobOutcome::success(json!({"messageId": "msg-1"})));

        let sent = transport.sent.lock();
        assert_eq!(sent[0].to, "first@example.com");
        assert_eq!(sent[0].from, "billing@example.com");
        assert_eq!(sent[0].subject, "Welcome aboard");
        assert_eq!(sent[0].variables["name"], "Ada");
    }

    #[tokio::test]
    async fn test_bad_payload_is_failure_outcome() {
        let handler = EmailHandler::new(Arc::new(LogMailTransport), "billing@example.com");
        let ctx = context(json!({"to": "a@example.com", "template": "NEWSLETTER"})).await;
        let outcome = handler.handle(&ctx).await;
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_payload_requires_data() {
        let missing = serde_json::from_value::<EmailPayload>(json!({"to": "a@example.com", "template": "WELCOME"}));
        assert!(missing.is_err());

        let payload: EmailPayload =
            serde_json::from_value(json!({"to": "a@example.com", "template": "WELCOME", "data": {}})).unwrap();
        assert!(payload.data.is_empty());
    }

    #[tokio::test]
    async fn test_empty_recipient_list_fails() {
        let handler = EmailHandler::new(Arc::new(LogMailTransport), "billing@example.com");
        let ctx = context(json!({"to": [], "template": "WELCOME", "data": {}})).await;
        match handler.handle(&ctx).await {
            JobOutcome::Failure(reason) => assert!(reason.contains("no recipient")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
