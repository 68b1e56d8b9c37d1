//! zpark API server binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use zpark_common::config::AppConfig;
use zpark_common::redis_pool::create_redis_pool;
use zpark_notifier::queue::{RedisTaskQueue, TaskQueueClient};
use zpark_notifier::task::RetryPolicy;

use zpark_api::routes::create_router;
use zpark_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("zpark_api=debug,zpark_notifier=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting zpark API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create Redis connection for the task queue
    let redis = create_redis_pool(&config.redis_url).await?;
    let queue = RedisTaskQueue::new(
        redis,
        Duration::from_millis(config.queue_poll_interval_ms),
    );
    let tasks = TaskQueueClient::new(Arc::new(queue), RetryPolicy::from_config(&config));
    tracing::info!("Task queue ready");

    let addr = config.bind_addr.clone();

    // Build application state
    let state = AppState::new(config, tasks);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    Ok(())
}
