//! Management API Authentication

use super::types::ErrorResponse;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared-secret authentication for mutating routes
pub struct ApiAuth {
    api_key: String,
}

impl ApiAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Validate the `X-API-Key` header
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        let Some(provided) = headers.get(API_KEY_HEADER) else {
            debug!("Request without API key");
            return false;
        };

        if constant_time_eq(provided.as_bytes(), self.api_key.as_bytes()) {
            true
        } else {
            warn!("API authentication failed");
            false
        }
    }
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authentication middleware function
pub async fn auth_middleware(
    State(auth): State<Arc<ApiAuth>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.authenticate(request.headers()) {
        next.run(request).await
    } else {
        let body = ErrorResponse {
            error: "unauthorized".to_string(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
