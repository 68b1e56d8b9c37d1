//! Alert submission route.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use zpark_common::error::AppError;
use zpark_common::types::AlertRequest;
use zpark_engine::composer::MessageComposer;

use crate::middleware::auth::ApiToken;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/alert", post(create_alert))
}

/// Raw request body for an alert, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct AlertBody {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

impl AlertBody {
    /// Check required fields and produce a validated alert.
    ///
    /// `to` and `subject` must be present and non-empty; `message` defaults to empty.
    pub fn validate(self) -> Result<AlertRequest, AppError> {
        let to = required("to", self.to)?;
        let subject = required("subject", self.subject)?;
        Ok(AlertRequest {
            to,
            subject,
            message: Some(self.message.unwrap_or_default()),
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!(
            "Required field '{}' is missing or empty",
            field
        ))),
    }
}

/// Response for an accepted alert.
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub to: String,
    /// The composed message text that will be delivered
    pub message: String,
    pub taskid: String,
}

/// POST /alert: Validate an alert, queue its delivery, return the task id.
///
/// Delivery happens asynchronously; a 200 means the alert was queued, not sent.
async fn create_alert(
    State(state): State<AppState>,
    _auth: ApiToken,
    body: Result<Json<AlertBody>, JsonRejection>,
) -> Result<Json<AlertResponse>, AppError> {
    let Json(body) =
        body.map_err(|e| AppError::Validation(format!("Invalid request body: {}", e.body_text())))?;
    let alert = body.validate()?;

    let outbound = MessageComposer::outbound(&alert);
    let text = outbound.text.clone();

    let handle = state
        .tasks
        .submit(outbound)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

    tracing::info!(
        task_id = %handle.id,
        to = %alert.to,
        "Alert accepted"
    );

    Ok(Json(AlertResponse {
        to: alert.to,
        message: text,
        taskid: handle.id.to_string(),
    }))
}
