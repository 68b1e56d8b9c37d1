//! Shared-secret authentication.
//!
//! Every endpoint requires the configured API token in the `Token` request
//! header. The comparison is an exact string match.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use zpark_common::error::AppError;

use crate::state::AppState;

/// Header carrying the API token.
pub const TOKEN_HEADER: &str = "token";

/// Proof that the request carried the configured API token.
///
/// Use as an Axum extractor on protected routes:
/// ```ignore
/// async fn handler(_auth: ApiToken) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApiToken;

/// Check a presented token against the configured one.
pub fn verify_token(presented: Option<&str>, expected: &str) -> Result<(), AppError> {
    match presented {
        None | Some("") => Err(AppError::Auth(
            "Missing API token. Send it in the 'Token' header".to_string(),
        )),
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(AppError::Auth("Invalid API token".to_string())),
    }
}

impl FromRequestParts<AppState> for ApiToken {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = verify_token(
            parts
                .headers
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok()),
            &state.config.api_token,
        );

        async move {
            if let Err(e) = &result {
                tracing::debug!(error = %e, "Rejected unauthenticated request");
            }
            result.map(|_| ApiToken)
        }
    }
}
