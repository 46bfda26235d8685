//! Control-plane authentication.
//!
//! The command front-end identifies itself with a static API key (the
//! configured bot-auth identity). With no keys configured the control
//! plane is open, which is the expected setup for loopback-only
//! deployments.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};

/// API key authentication configuration.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    /// Valid API keys
    api_keys: Arc<Vec<String>>,
    /// Header name for API key
    header_name: String,
}

impl ApiKeyAuth {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            header_name: "X-API-Key".to_string(),
        }
    }

    /// Check if an API key is valid.
    pub fn is_valid(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }

    /// Whether authentication is enabled at all.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }
}

/// Middleware function for API key authentication.
pub async fn api_key_auth(
    auth: ApiKeyAuth,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !auth.is_enabled() {
        return Ok(next.run(request).await);
    }

    let api_key = request
        .headers()
        .get(auth.header_name())
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if auth.is_valid(key) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("missing API key in request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
