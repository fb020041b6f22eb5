use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Domain error taxonomy surfaced to API callers.
///
/// Delivery failures never appear here: a subscriber's broken transport is
/// absorbed by its connection handle and the dispatcher, not the sender.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            ChatError::InvalidRequest(r) => (StatusCode::BAD_REQUEST, r.to_owned()),
            ChatError::Unauthorized(r) => (StatusCode::UNAUTHORIZED, r.to_owned()),
            ChatError::NotFound(r) => (StatusCode::NOT_FOUND, r.to_owned()),
            ChatError::Store(e) => {
                tracing::error!(error = %e, "storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_owned())
            }
        };
        (status, Json(ErrorResp { error: reason })).into_response()
    }
}
