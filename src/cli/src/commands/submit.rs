//! Job submission commands.
//!
//! Builds a `POST /api/jobs` body from flags; the server does all validation.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SubmitCommands {
    /// Queue an email
    Email {
        /// Recipient address (repeat for several recipients)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// Template (WELCOME, PASSWORD_RESET, INVOICE_REMINDER, ...)
        #[arg(short, long)]
        template: String,

        /// Subject line, overriding the template default
        #[arg(long)]
        subject: Option<String>,

        /// Template variable as key=value (value parsed as JSON when possible)
        #[arg(short, long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,

        #[command(flatten)]
        options: JobFlags,
    },

    /// Queue a PDF rendering
    Pdf {
        /// Document type (invoice, quote, report)
        #[arg(long = "type")]
        document_type: String,

        /// Document identifier
        #[arg(long)]
        document_id: Uuid,

        #[command(flatten)]
        options: JobFlags,
    },

    /// Submit a raw request body from a JSON file
    File {
        /// Path to a JSON file holding `{type, payload, options}`
        path: String,
    },
}

/// Per-job options shared by every lane.
#[derive(Args)]
pub struct JobFlags {
    /// Priority, 1 (highest) to 10
    #[arg(short, long)]
    priority: Option<i64>,

    /// Delay before the job becomes claimable, in milliseconds
    #[arg(long)]
    delay: Option<i64>,

    /// Total attempts, 1 to 5
    #[arg(short, long)]
    attempts: Option<i64>,
}

impl JobFlags {
    fn to_value(&self) -> Option<Value> {
        let mut options = Map::new();
        if let Some(p) = self.priority {
            options.insert("priority".into(), json!(p));
        }
        if let Some(d) = self.delay {
            options.insert("delay".into(), json!(d));
        }
        if let Some(a) = self.attempts {
            options.insert("attempts".into(), json!(a));
        }
        (!options.is_empty()).then_some(Value::Object(options))
    }
}

#[derive(Serialize)]
struct SubmitRequest {
    #[serde(rename = "type")]
    job_type: &'static str,
    payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    id: Uuid,
    name: String,
    queue_name: String,
    timestamp: i64,
}

/// Parse `key=value` pairs into a JSON object.
fn parse_data(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(data)
}

fn build_request(cmd: SubmitCommands) -> Result<Value> {
    let request = match cmd {
        SubmitCommands::Email {
            to,
            template,
            subject,
            data,
            options,
        } => {
            let to = match to.as_slice() {
                [single] => json!(single),
                _ => json!(to),
            };
            let data = parse_data(&data)?;
            let mut payload = json!({ "to": to, "template": template, "data": data });
            if let Some(subject) = subject {
                payload["subject"] = json!(subject);
            }
            SubmitRequest {
                job_type: "email",
                payload,
                options: options.to_value(),
            }
        }
        SubmitCommands::Pdf {
            document_type,
            document_id,
            options,
        } => SubmitRequest {
            job_type: "pdf",
            payload: json!({ "type": document_type, "documentId": document_id }),
            options: options.to_value(),
        },
        SubmitCommands::File { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read request file: {}", path))?;
            return serde_json::from_str(&content).context("Failed to parse request JSON");
        }
    };
    Ok(serde_json::to_value(request)?)
}

pub async fn execute(cmd: SubmitCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let body = build_request(cmd)?;
    let resp: SubmitResponse = client.post("/api/jobs", &body).await?;

    match format {
        OutputFormat::Table => {
            output::print_success("Job submitted");
            output::print_detail("ID", &resp.id.to_string());
            output::print_detail("Queue", &resp.queue_name);
            output::print_detail("Name", &resp.name);
            output::print_detail("Submitted", &output::format_millis(Some(resp.timestamp)));
        }
        _ => output::print_item(&resp, format)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(priority: Option<i64>, delay: Option<i64>, attempts: Option<i64>) -> JobFlags {
        JobFlags { priority, delay, attempts }
    }

    #[test]
    fn test_email_request_shape() {
        let body = build_request(SubmitCommands::Email {
            to: vec!["ada@example.com".into()],
            template: "WELCOME".into(),
            subject: None,
            data: vec!["name=Ada".into(), "credits=5".into()],
            options: flags(Some(2), None, Some(3)),
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "type": "email",
                "payload": {
                    "to": "ada@example.com",
                    "template": "WELCOME",
                    "data": {"name": "Ada", "credits": 5}
                },
                "options": {"priority": 2, "attempts": 3}
            })
        );
    }

    #[test]
    fn test_multiple_recipients_become_array() {
        let body = build_request(SubmitCommands::Email {
            to: vec!["a@example.com".into(), "b@example.com".into()],
            template: "WELCOME".into(),
            subject: Some("Hi".into()),
            data: vec![],
            options: flags(None, None, None),
        })
        .unwrap();

        assert_eq!(body["payload"]["to"], json!(["a@example.com", "b@example.com"]));
        assert_eq!(body["payload"]["subject"], "Hi");
        assert_eq!(body["payload"]["data"], json!({}));
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_pdf_request_shape() {
        let id = Uuid::new_v4();
        let body = build_request(SubmitCommands::Pdf {
            document_type: "invoice".into(),
            document_id: id,
            options: flags(None, Some(5000), None),
        })
        .unwrap();

        assert_eq!(body["type"], "pdf");
        assert_eq!(body["payload"], json!({"type": "invoice", "documentId": id}));
        assert_eq!(body["options"], json!({"delay": 5000}));
    }

    #[test]
    fn test_bad_data_pair_rejected() {
        assert!(parse_data(&["novalue".to_string()]).is_err());
    }
}
