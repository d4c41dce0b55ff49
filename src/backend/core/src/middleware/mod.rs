//! HTTP middleware: admin authentication and submission rate limiting.
pub mod auth;
pub mod rate_limit;

pub use auth::{
    hash_api_key, ApiKeyEntry, AuthConfig, AuthContext, AuthError, AuthLayer, AuthMethod,
    Authenticator, Claims,
};
pub use rate_limit::{RateLimitConfig, RateLimitLayer, RateLimitResult, RateLimiter};
