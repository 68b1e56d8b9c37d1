use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager for the task queue.
///
/// The manager reconnects on its own after a dropped connection, so a broker
/// restart does not take the API or the workers down.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
