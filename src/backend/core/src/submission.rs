//! Job submission: request shape, validation and admission.
//!
//! A submission names a lane (`email` or `pdf`), a lane-specific payload and
//! optional admission options. Everything is checked before the registry is
//! touched, so a rejected request never creates a job record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{JobforgeError, Result};
use crate::jobs::handlers::{DocumentType, EmailPayload, EmailTemplate, PdfPayload};
use crate::jobs::{JobId, JobOptions, JobRecord, QueueName, QueueRegistry};
use crate::validation::{
    Email, FieldError, OneOf, Range, Required, Uuid, ValidationErrorKind, ValidationErrors,
};

pub const MAX_PRIORITY: i64 = 10;
pub const MAX_DELAY_MS: i64 = 86_400_000;
pub const MAX_ATTEMPTS: i64 = 5;

/// Body of `POST /api/jobs`, kept loosely typed so every field problem is
/// reported at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub options: Option<Value>,
}

/// Acknowledgement returned once a job is admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub id: JobId,
    pub name: String,
    pub queue_name: String,
    /// Admission time, epoch milliseconds.
    pub timestamp: i64,
}

impl From<&JobRecord> for SubmitResponse {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            queue_name: job.queue_name.clone(),
            timestamp: job.created_at.timestamp_millis(),
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Email(EmailPayload, JobOptions),
    Pdf(PdfPayload, JobOptions),
}

impl Submission {
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Email(..) => QueueName::Email,
            Self::Pdf(..) => QueueName::Pdf,
        }
    }

    /// Admit the job to its lane.
    pub async fn admit(&self, registry: &QueueRegistry) -> Result<JobRecord> {
        match self {
            Self::Email(payload, options) => registry.queue_email(payload, options.clone()).await,
            Self::Pdf(payload, options) => registry.queue_pdf(payload, options.clone()).await,
        }
    }
}

/// Validate and admit in one step.
pub async fn submit(registry: &QueueRegistry, request: SubmitRequest) -> Result<SubmitResponse> {
    let submission = validate(request)?;
    let job = submission.admit(registry).await?;
    Ok(SubmitResponse::from(&job))
}

/// Check a request, collecting every failing field.
pub fn validate(request: SubmitRequest) -> Result<Submission> {
    let mut errors = ValidationErrors::new();

    let lane = match request.job_type.as_deref() {
        None => {
            errors.add_required("type");
            None
        }
        Some(raw) => {
            errors.check("type", &OneOf::new(vec!["email", "pdf"]), &raw);
            raw.parse::<QueueName>().ok()
        }
    };

    let options = validate_options(request.options.as_ref(), &mut errors);

    let payload = match request.payload {
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            errors.add_error("payload", object_expected());
            None
        }
        None => {
            errors.add_required("payload");
            None
        }
    };

    match (lane, payload.as_ref()) {
        (Some(QueueName::Email), Some(map)) => validate_email(map, &mut errors),
        (Some(QueueName::Pdf), Some(map)) => validate_pdf(map, &mut errors),
        _ => {}
    }

    match (lane, payload) {
        (Some(lane), Some(map)) if errors.is_empty() => decode(lane, Value::Object(map), options),
        _ => Err(errors.into()),
    }
}

fn decode(lane: QueueName, payload: Value, options: JobOptions) -> Result<Submission> {
    let decoded = match lane {
        QueueName::Email => serde_json::from_value(payload).map(|p| Submission::Email(p, options)),
        QueueName::Pdf => serde_json::from_value(payload).map(|p| Submission::Pdf(p, options)),
    };
    decoded.map_err(|e| {
        let mut errors = ValidationErrors::new();
        errors.add(
            "payload",
            FieldError::with_message(object_expected(), e.to_string()),
        );
        JobforgeError::from(errors)
    })
}

fn object_expected() -> ValidationErrorKind {
    ValidationErrorKind::InvalidType {
        expected: "an object".to_string(),
    }
}

/// Read an integer option, recording a type error for anything else.
fn integer(options: &Map<String, Value>, key: &str, errors: &mut ValidationErrors) -> Option<i64> {
    let field = format!("options.{}", key);
    match options.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_i64() {
            Some(n) => Some(n),
            None => {
                errors.add_error(
                    field,
                    ValidationErrorKind::InvalidType {
                        expected: "an integer".to_string(),
                    },
                );
                None
            }
        },
    }
}

fn validate_options(options: Option<&Value>, errors: &mut ValidationErrors) -> JobOptions {
    let options = match options {
        None | Some(Value::Null) => return JobOptions::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            errors.add_error("options", object_expected());
            return JobOptions::new();
        }
    };

    let priority = integer(options, "priority", errors);
    let delay = integer(options, "delay", errors);
    let attempts = integer(options, "attempts", errors);

    errors.check("options.priority", &Range::new(1i64, MAX_PRIORITY), &priority);
    errors.check("options.delay", &Range::new(0i64, MAX_DELAY_MS), &delay);
    errors.check("options.attempts", &Range::new(1i64, MAX_ATTEMPTS), &attempts);

    let mut job_options = JobOptions::new();
    if let Some(p) = priority.filter(|p| (1..=MAX_PRIORITY).contains(p)) {
        job_options = job_options.with_priority(p as u32);
    }
    if let Some(d) = delay.filter(|d| (0..=MAX_DELAY_MS).contains(d)) {
        job_options = job_options.with_delay(Duration::from_millis(d as u64));
    }
    if let Some(a) = attempts.filter(|a| (1..=MAX_ATTEMPTS).contains(a)) {
        job_options = job_options.with_attempts(a as u32);
    }
    job_options
}

/// An optional string field; non-strings are recorded as type errors.
fn string_field(
    map: &Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut ValidationErrors,
) -> Option<String> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.add_error(
                field,
                ValidationErrorKind::InvalidType {
                    expected: "a string".to_string(),
                },
            );
            None
        }
    }
}

fn validate_email(payload: &Map<String, Value>, errors: &mut ValidationErrors) {
    match payload.get("to") {
        Some(Value::String(to)) => errors.check("payload.to", &Email, to),
        Some(Value::Array(list)) if !list.is_empty() => {
            for (i, entry) in list.iter().enumerate() {
                let field = format!("payload.to[{}]", i);
                match entry.as_str() {
                    Some(to) => errors.check(&field, &Email, &to.to_string()),
                    None => errors.add_error(
                        field,
                        ValidationErrorKind::InvalidType {
                            expected: "a string".to_string(),
                        },
                    ),
                }
            }
        }
        Some(Value::Array(_)) | None | Some(Value::Null) => errors.add_required("payload.to"),
        Some(_) => errors.add_error(
            "payload.to",
            ValidationErrorKind::InvalidType {
                expected: "a string or a list of strings".to_string(),
            },
        ),
    }

    let template = string_field(payload, "template", "payload.template", errors);
    errors.check("payload.template", &Required, &template);
    let templates: Vec<&str> = EmailTemplate::ALL.iter().map(|t| t.as_str()).collect();
    errors.check("payload.template", &OneOf::new(templates), &template.as_deref().filter(|t| !t.trim().is_empty()));

    match payload.get("data") {
        Some(Value::Object(_)) => {}
        None | Some(Value::Null) => errors.add_required("payload.data"),
        Some(_) => errors.add_error("payload.data", object_expected()),
    }

    let from = string_field(payload, "from", "payload.from", errors);
    errors.check("payload.from", &Email, &from);
    string_field(payload, "subject", "payload.subject", errors);

    match payload.get("attachments") {
        None | Some(Value::Null) => {}
        Some(Value::Array(list)) => {
            for (i, attachment) in list.iter().enumerate() {
                let field = format!("payload.attachments[{}].filename", i);
                let filename = attachment.get("filename").and_then(Value::as_str).map(str::to_string);
                errors.check(&field, &Required, &filename);
            }
        }
        Some(_) => errors.add_error(
            "payload.attachments",
            ValidationErrorKind::InvalidType {
                expected: "a list".to_string(),
            },
        ),
    }
}

fn validate_pdf(payload: &Map<String, Value>, errors: &mut ValidationErrors) {
    let document_type = string_field(payload, "type", "payload.type", errors);
    errors.check("payload.type", &Required, &document_type);
    let types: Vec<&str> = DocumentType::ALL.iter().map(|t| t.as_str()).collect();
    errors.check("payload.type", &OneOf::new(types), &document_type.as_deref().filter(|t| !t.is_empty()));

    let document_id = string_field(payload, "documentId", "payload.documentId", errors);
    errors.check("payload.documentId", &Required, &document_id);
    errors.check("payload.documentId", &Uuid, &document_id.filter(|id| !id.is_empty()));

    let user_id = string_field(payload, "userId", "payload.userId", errors);
    errors.check("payload.userId", &Uuid, &user_id);
    let organization_id = string_field(payload, "organizationId", "payload.organizationId", errors);
    errors.check("payload.organizationId", &Uuid, &organization_id);

    let options = match payload.get("options") {
        None | Some(Value::Null) => return,
        Some(Value::Object(map)) => map,
        Some(_) => {
            errors.add_error("payload.options", object_expected());
            return;
        }
    };

    let format = string_field(options, "format", "payload.options.format", errors);
    errors.check("payload.options.format", &OneOf::new(vec!["A4".to_string(), "Letter".to_string()]), &format);
    let orientation = string_field(options, "orientation", "payload.options.orientation", errors);
    errors.check(
        "payload.options.orientation",
        &OneOf::new(vec!["portrait".to_string(), "landscape".to_string()]),
        &orientation,
    );

    match options.get("margin") {
        None | Some(Value::Null) => {}
        Some(Value::Object(margin)) => {
            for side in ["top", "right", "bottom", "left"] {
                string_field(margin, side, &format!("payload.options.margin.{}", side), errors);
            }
        }
        Some(_) => errors.add_error("payload.options.margin", object_expected()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::{InMemoryQueueFactory, QueueSettings};
    use serde_json::json;
    use std::sync::Arc;

    fn request(body: Value) -> SubmitRequest {
        serde_json::from_value(body).unwrap()
    }

    fn email_body() -> Value {
        json!({
            "type": "email",
            "payload": {"to": "ada@example.com", "template": "WELCOME", "data": {"name": "Ada"}},
            "options": {"priority": 2, "delay": 1000, "attempts": 5}
        })
    }

    #[test]
    fn test_valid_email_submission() {
        match validate(request(email_body())).unwrap() {
            Submission::Email(payload, options) => {
                assert_eq!(payload.template, EmailTemplate::Welcome);
                assert_eq!(options.priority, Some(2));
                assert_eq!(options.delay_ms, Some(1000));
                assert_eq!(options.attempts, Some(5));
            }
            other => panic!("expected email, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_pdf_submission() {
        let body = json!({
            "type": "pdf",
            "payload": {
                "type": "invoice",
                "documentId": uuid::Uuid::new_v4(),
                "options": {"format": "Letter", "orientation": "portrait"}
            }
        });
        let submission = validate(request(body)).unwrap();
        assert_eq!(submission.queue(), QueueName::Pdf);
    }

    #[test]
    fn test_option_bounds() {
        for (field, value) in [("priority", 11), ("priority", 0), ("delay", -1), ("delay", 86_400_001), ("attempts", 6)] {
            let mut body = email_body();
            body["options"][field] = json!(value);
            let err = validate(request(body)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationError);
            assert!(err.details().fields.contains_key(&format!("options.{}", field)), "{}={}", field, value);
        }
    }

    #[test]
    fn test_non_integer_option_rejected() {
        let mut body = email_body();
        body["options"]["priority"] = json!(2.5);
        let err = validate(request(body)).unwrap_err();
        assert!(err.details().fields.contains_key("options.priority"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = validate(request(json!({"type": "sms", "payload": {}}))).unwrap_err();
        assert!(err.details().fields.contains_key("type"));
    }

    #[test]
    fn test_email_fields_collected() {
        let body = json!({
            "type": "email",
            "payload": {"to": ["ok@example.com", "nope"], "template": "NEWSLETTER", "from": "bad"}
        });
        let err = validate(request(body)).unwrap_err();
        let fields = &err.details().fields;
        assert!(fields.contains_key("payload.to[1]"));
        assert!(fields.contains_key("payload.template"));
        assert!(fields.contains_key("payload.from"));
        assert!(fields.contains_key("payload.data"));
        assert!(!fields.contains_key("payload.to[0]"));
    }

    #[tokio::test]
    async fn test_email_without_data_rejected() {
        let registry = QueueRegistry::new(Arc::new(InMemoryQueueFactory), QueueSettings::default());
        for data in [None, Some(Value::Null)] {
            let mut body = email_body();
            let payload = body["payload"].as_object_mut().unwrap();
            match data {
                Some(value) => payload.insert("data".to_string(), value),
                None => payload.remove("data"),
            };

            let err = submit(&registry, request(body)).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationError);
            assert!(err.details().fields.contains_key("payload.data"));
        }
        assert_eq!(registry.stats("email").await.unwrap().total, 0);
    }

    #[test]
    fn test_email_data_must_be_object() {
        let mut body = email_body();
        body["payload"]["data"] = json!(["name", "Ada"]);
        let err = validate(request(body)).unwrap_err();
        assert!(err.details().fields.contains_key("payload.data"));
    }

    #[test]
    fn test_pdf_requires_uuid() {
        let body = json!({"type": "pdf", "payload": {"type": "report", "documentId": "doc-42"}});
        let err = validate(request(body)).unwrap_err();
        assert!(err.details().fields.contains_key("payload.documentId"));
    }

    #[tokio::test]
    async fn test_rejected_submission_creates_no_job() {
        let registry = QueueRegistry::new(Arc::new(InMemoryQueueFactory), QueueSettings::default());
        let mut body = email_body();
        body["options"]["priority"] = json!(11);

        assert!(submit(&registry, request(body)).await.is_err());
        assert_eq!(registry.stats("email").await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_submit_returns_acknowledgement() {
        let registry = QueueRegistry::new(Arc::new(InMemoryQueueFactory), QueueSettings::default());
        let ack = submit(&registry, request(email_body())).await.unwrap();
        assert_eq!(ack.name, "send-email");
        assert_eq!(ack.queue_name, "email");

        let job = registry.get_job("email", ack.id).await.unwrap();
        assert_eq!(job.priority, 2);
        assert_eq!(job.max_attempts, 5);
    }
}
