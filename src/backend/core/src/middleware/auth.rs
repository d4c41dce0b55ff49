//! Authentication and admin authorization middleware.
//!
//! Every non-public path requires an authenticated caller holding the admin
//! role. Callers authenticate with either:
//! - `Authorization: Bearer <jwt>` (HS256, roles carried in the claims)
//! - `X-API-Key: <key>`, looked up by its SHA-256 digest
//!
//! Missing or invalid credentials yield 401, a valid caller without the admin
//! role yields 403. Both are returned before the handler runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobforge_core::middleware::{AuthConfig, AuthLayer};
//!
//! let config = AuthConfig {
//!     jwt_secret: Some("change-me".into()),
//!     ..Default::default()
//! };
//! let app = Router::new()
//!     .route("/api/stats", get(stats))
//!     .layer(AuthLayer::from_config(config)?);
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, JobforgeError};

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Administrator privileges required")]
    InsufficientPermissions,

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl From<AuthError> for JobforgeError {
    fn from(error: AuthError) -> Self {
        let message = error.to_string();
        match error {
            AuthError::MissingCredentials | AuthError::InvalidApiKey => JobforgeError::unauthorized(message),
            AuthError::InvalidToken => JobforgeError::new(ErrorCode::InvalidToken, message),
            AuthError::TokenExpired => JobforgeError::new(ErrorCode::TokenExpired, message),
            AuthError::InsufficientPermissions => JobforgeError::forbidden(message),
            AuthError::Internal(detail) => JobforgeError::internal(detail),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        counter!("jobforge_auth_failures_total", "reason" => format!("{:?}", self)).increment(1);
        JobforgeError::from(self).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JWT Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// JWT token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Token ID
    #[serde(default = "generate_jti")]
    pub jti: String,

    pub iat: i64,

    pub exp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

fn generate_jti() -> String {
    Uuid::new_v4().to_string()
}

impl Claims {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.into(),
            roles,
            jti: generate_jti(),
            iat: now.timestamp(),
            exp: (now + duration).timestamp(),
            iss: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// An accepted API key, stored as the hex SHA-256 digest of the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub name: String,
    pub key_sha256: String,
    #[serde(default = "default_key_roles")]
    pub roles: Vec<String>,
}

fn default_key_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,

    /// HS256 signing secret
    pub jwt_secret: Option<String>,

    /// Required `iss` claim, when set
    pub issuer: Option<String>,

    /// Leeway for expiration checks (in seconds)
    pub leeway_secs: u64,

    pub api_keys: Vec<ApiKeyEntry>,

    /// Role a caller must hold on every protected path
    pub admin_role: String,

    /// Paths that don't require authentication; a trailing `*` matches a prefix
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: None,
            issuer: None,
            leeway_secs: 60,
            api_keys: Vec::new(),
            admin_role: "admin".to_string(),
            public_paths: vec!["/health".to_string(), "/health/*".to_string(), "/metrics".to_string()],
        }
    }
}

/// Hex SHA-256 digest of an API key, the form keys are configured in.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Auth Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication context attached to requests.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub roles: Vec<String>,
    pub auth_method: AuthMethod,
    pub expires_at: Option<DateTime<Utc>>,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Jwt,
    ApiKey,
    Anonymous,
}

impl AuthContext {
    pub fn from_claims(claims: Claims, request_id: String) -> Self {
        let expires_at = claims.expires_at();
        Self {
            user_id: claims.sub,
            roles: claims.roles,
            auth_method: AuthMethod::Jwt,
            expires_at: Some(expires_at),
            request_id,
        }
    }

    pub fn from_api_key(entry: &ApiKeyEntry, request_id: String) -> Self {
        Self {
            user_id: format!("key:{}", entry.name),
            roles: entry.roles.clone(),
            auth_method: AuthMethod::ApiKey,
            expires_at: None,
            request_id,
        }
    }

    pub fn anonymous(request_id: String) -> Self {
        Self {
            user_id: "anonymous".to_string(),
            roles: Vec::new(),
            auth_method: AuthMethod::Anonymous,
            expires_at: None,
            request_id,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_method != AuthMethod::Anonymous
    }
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Authenticator {
    config: AuthConfig,
    encoding_key: Option<EncodingKey>,
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    /// Fails with `ConfigurationError` when enabled without any credential
    /// source.
    pub fn new(config: AuthConfig) -> Result<Self, JobforgeError> {
        if config.enabled && config.jwt_secret.is_none() && config.api_keys.is_empty() {
            return Err(JobforgeError::configuration(
                "auth is enabled but neither auth.jwt_secret nor auth.api_keys is set",
            ));
        }
        for entry in &config.api_keys {
            let valid = entry.key_sha256.len() == 64 && hex::decode(&entry.key_sha256).is_ok();
            if !valid {
                return Err(JobforgeError::configuration(format!(
                    "auth.api_keys entry '{}' is not a hex SHA-256 digest",
                    entry.name
                )));
            }
        }

        let (encoding_key, decoding_key) = match config.jwt_secret.as_deref() {
            Some(secret) => (
                Some(EncodingKey::from_secret(secret.as_bytes())),
                Some(DecodingKey::from_secret(secret.as_bytes())),
            ),
            None => (None, None),
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn is_public_path(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == p,
        })
    }

    /// Identify the caller. Bearer tokens take precedence over API keys.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let request_id = request_id(headers);

        if let Some(token) = extract_bearer(headers) {
            return self.validate_jwt(&token, request_id);
        }
        if let Some(key) = headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
            return self.validate_api_key(key, request_id);
        }
        Err(AuthError::MissingCredentials)
    }

    /// Authenticate and require the admin role.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let context = self.authenticate(headers)?;
        if !context.has_role(&self.config.admin_role) {
            warn!(user_id = %context.user_id, "Non-admin caller rejected");
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(context)
    }

    fn validate_jwt(&self, token: &str, request_id: String) -> Result<AuthContext, AuthError> {
        let decoding_key = self.decoding_key.as_ref().ok_or(AuthError::InvalidToken)?;

        let token_data = decode::<Claims>(token, decoding_key, &self.validation).map_err(|e| {
            debug!("JWT validation failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;

        counter!("jobforge_auth_success_total", "method" => "jwt").increment(1);
        Ok(AuthContext::from_claims(token_data.claims, request_id))
    }

    fn validate_api_key(&self, key: &str, request_id: String) -> Result<AuthContext, AuthError> {
        let digest = hash_api_key(key);
        let entry = self
            .config
            .api_keys
            .iter()
            .find(|entry| entry.key_sha256.eq_ignore_ascii_case(&digest))
            .ok_or(AuthError::InvalidApiKey)?;

        counter!("jobforge_auth_success_total", "method" => "api_key").increment(1);
        Ok(AuthContext::from_api_key(entry, request_id))
    }

    /// Sign a token with the configured secret.
    pub fn generate_token(&self, claims: &Claims) -> Result<String, AuthError> {
        let encoding_key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("JWT secret not configured".into()))?;
        encode(&Header::new(Algorithm::HS256), claims, encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to generate token: {}", e)))
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
        .map(|s| s.trim().to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }

    pub fn from_config(config: AuthConfig) -> Result<Self, JobforgeError> {
        Ok(Self::new(Arc::new(Authenticator::new(config)?)))
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = request.uri().path();

            if !authenticator.config.enabled || authenticator.is_public_path(path) {
                let context = AuthContext::anonymous(request_id(request.headers()));
                request.extensions_mut().insert(context);
                return inner.call(request).await;
            }

            match authenticator.authorize(request.headers()) {
                Ok(context) => {
                    request.extensions_mut().insert(context);
                    inner.call(request).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
