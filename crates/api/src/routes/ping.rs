//! Authenticated liveness check.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::API_VERSION;
use crate::middleware::auth::ApiToken;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ping", get(ping))
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub apiversion: &'static str,
}

/// GET /ping: Confirm the API is up and the caller's token is valid.
async fn ping(_auth: ApiToken) -> Json<PingResponse> {
    Json(PingResponse {
        apiversion: API_VERSION,
    })
}
