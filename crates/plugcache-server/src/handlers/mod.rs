//! Request handlers.

pub mod health;
pub mod providers;

use axum::{Json, http::StatusCode};
use plugcache_core::Error;
use plugcache_registry::protocol::ErrorResponse;

/// Registry-style error reply: a status and an `{"errors": [...]}` body.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::UnknownRequest(_) => StatusCode::NOT_FOUND,
        Error::InvalidAddress(_) => StatusCode::BAD_REQUEST,
        Error::DiscoveryUnavailable { .. } => StatusCode::BAD_GATEWAY,
        e if e.is_fetch_failure() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ErrorReply {
    fn from(err: Error) -> Self {
        ErrorReply(api_error(status_for(&err), err.to_string()))
    }
}

/// Lets handlers use `?` on `plugcache_core::Result`.
pub struct ErrorReply(pub ApiError);

impl axum::response::IntoResponse for ErrorReply {
    fn into_response(self) -> axum::response::Response {
        self.0.into_response()
    }
}

impl From<ApiError> for ErrorReply {
    fn from(err: ApiError) -> Self {
        ErrorReply(err)
    }
}
