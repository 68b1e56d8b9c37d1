//! Shared application state for the Axum API server.

use zpark_common::config::AppConfig;
use zpark_notifier::queue::TaskQueueClient;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub tasks: TaskQueueClient,
}

impl AppState {
    pub fn new(config: AppConfig, tasks: TaskQueueClient) -> Self {
        Self { config, tasks }
    }
}
