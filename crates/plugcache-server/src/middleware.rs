//! HTTP middleware for the cache server.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::handlers::api_error;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

fn presented_token(request: &Request<Body>) -> Option<&str> {
    let headers = request.headers();
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Reject requests that do not carry this process's token.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // The x-api-key header may carry the bare uuid or the full token.
    let authorized = presented_token(&request).is_some_and(|token| {
        token == state.token || Some(token) == state.token.strip_prefix("x-api-key:")
    });
    if !authorized {
        debug!(uri = %request.uri(), "Rejected unauthenticated request");
        return api_error(StatusCode::UNAUTHORIZED, "missing or invalid token").into_response();
    }
    next.run(request).await
}
