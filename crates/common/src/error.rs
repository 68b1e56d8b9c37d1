use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced at the HTTP boundary.
///
/// Delivery failures never appear here: they are handled inside the dispatch
/// worker after the caller already has its task id.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Validation error: {0}")]
    Validation(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Queue(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
