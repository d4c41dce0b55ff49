//! HTTP client for the Jobforge API server.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Success envelope returned by the server.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

/// Error envelope returned by the server on any non-2xx status.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<ErrorDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetails {
    #[serde(default)]
    fields: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    retry_after_secs: Option<u64>,
}

/// HTTP client for the Jobforge API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        Self::unwrap_data(resp, &url).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.post(&url).json(body))
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        Self::unwrap_data(resp, &url).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;
        Self::unwrap_data(resp, &url).await
    }

    /// GET a health endpoint that does not use the success envelope.
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;

        // Readiness answers 503 with a JSON body worth showing.
        if status.is_success() || status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            Ok(body)
        } else {
            anyhow::bail!("API error ({}): {}", status, body)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn unwrap_data<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(describe_error(status, &body));
        }

        let api_resp: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;

        match api_resp {
            ApiResponse { success: true, data: Some(data) } => Ok(data),
            _ => anyhow::bail!("API returned success but no data"),
        }
    }
}

/// Render a server error envelope as a single readable message.
fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return format!("API error ({}): {}", status, body);
    };

    let ErrorBody { code, message, details } = envelope.error;
    let mut out = format!("{} ({}): {}", code, status.as_u16(), message);
    let details = details.unwrap_or_default();
    for (field, problems) in &details.fields {
        out.push_str(&format!("\n  {}: {}", field, problems.join("; ")));
    }
    if let Some(secs) = details.retry_after_secs {
        out.push_str(&format!("\n  retry after {}s", secs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_describe_validation_error() {
        let body = json!({
            "success": false,
            "error": {
                "code": "VALIDATION_ERROR",
                "numeric_code": 4100,
                "message": "Invalid job submission",
                "details": {"fields": {"options.priority": ["must be between 1 and 10"]}},
                "timestamp": "2026-01-01T00:00:00Z"
            }
        });
        let msg = describe_error(reqwest::StatusCode::UNPROCESSABLE_ENTITY, &body.to_string());
        assert!(msg.starts_with("VALIDATION_ERROR (422): Invalid job submission"));
        assert!(msg.contains("options.priority: must be between 1 and 10"));
    }

    #[test]
    fn test_describe_non_envelope_body() {
        let msg = describe_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(msg, "API error (502 Bad Gateway): upstream down");
    }

    #[tokio::test]
    async fn test_api_key_header_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .and(header("X-API-Key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"email": {"waiting": 1}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&format!("{}/", server.uri()), Some("secret".into())).unwrap();
        let stats: serde_json::Value = client.get("/api/stats").await.unwrap();
        assert_eq!(stats["email"]["waiting"], 1);
    }

    #[tokio::test]
    async fn test_rate_limited_error_mentions_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "success": false,
                "error": {
                    "code": "RATE_LIMIT_EXCEEDED",
                    "numeric_code": 4102,
                    "message": "Too many submissions",
                    "details": {"retry_after_secs": 12},
                    "timestamp": "2026-01-01T00:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None).unwrap();
        let err = client
            .post::<_, serde_json::Value>("/api/jobs", &json!({}))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("RATE_LIMIT_EXCEEDED (429)"), "{}", err);
        assert!(err.contains("retry after 12s"), "{}", err);
    }
}
