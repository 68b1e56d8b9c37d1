//! zpark dispatch worker binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use zpark_common::config::AppConfig;
use zpark_common::redis_pool::create_redis_pool;
use zpark_notifier::queue::RedisTaskQueue;
use zpark_notifier::spark::SparkClient;
use zpark_notifier::worker::DispatchWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zpark_notifier=info,zpark_worker=info".into()),
        )
        .json()
        .init();

    tracing::info!("zpark dispatch worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let access_token = config.spark_access_token.clone().ok_or_else(|| {
        anyhow::anyhow!("SPARK_ACCESS_TOKEN environment variable is required by the worker")
    })?;

    // Messaging platform client
    let api = SparkClient::new(
        &config.spark_api_url,
        access_token,
        Duration::from_secs(config.spark_timeout_secs),
    )?;

    // Task queue
    let redis = create_redis_pool(&config.redis_url).await?;
    let queue = RedisTaskQueue::new(
        redis,
        Duration::from_millis(config.queue_poll_interval_ms),
    );

    let worker = DispatchWorker::new(Arc::new(queue), Arc::new(api));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(config.worker_concurrency, shutdown_rx).await?;

    tracing::info!("zpark dispatch worker stopped.");
    Ok(())
}
