//! zpark HTTP API.
//!
//! Endpoints:
//! - GET  /ping : authenticated liveness check
//! - POST /alert: validate an alert and queue its delivery

pub mod middleware;
pub mod routes;
pub mod state;

/// Version reported by `GET /ping`.
pub const API_VERSION: &str = "1.0";
