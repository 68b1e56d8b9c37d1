/// Global application configuration loaded from environment variables.
///
/// Built once at startup and handed to the API server and the dispatch worker.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Shared secret expected in the `Token` request header
    pub api_token: String,

    /// Redis connection string (task queue broker)
    pub redis_url: String,

    /// Base URL of the messaging platform REST API
    pub spark_api_url: String,

    /// Bearer token for the messaging platform API (required by the worker only)
    pub spark_access_token: Option<String>,

    /// Timeout in seconds for a single messaging API request
    pub spark_timeout_secs: u64,

    /// Address the API server binds to
    pub bind_addr: String,

    /// Number of concurrent dispatch workers
    pub worker_concurrency: usize,

    /// Maximum attempts per dispatch task before it is marked failed (default: 3)
    pub task_max_attempts: u32,

    /// Fixed delay in seconds between attempts (default: 20)
    pub task_retry_delay_secs: u64,

    /// Idle poll interval of the Redis task queue in milliseconds
    pub queue_poll_interval_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            api_token: std::env::var("ZPARK_API_TOKEN")
                .map_err(|_| anyhow::anyhow!("ZPARK_API_TOKEN environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            spark_api_url: std::env::var("SPARK_API_URL")
                .unwrap_or_else(|_| "https://webexapis.com/v1".to_string()),
            spark_access_token: std::env::var("SPARK_ACCESS_TOKEN").ok(),
            spark_timeout_secs: std::env::var("SPARK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SPARK_TIMEOUT_SECS must be a valid u64"))?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_CONCURRENCY must be a valid usize"))?,
            task_max_attempts: std::env::var("TASK_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TASK_MAX_ATTEMPTS must be a valid u32"))?,
            task_retry_delay_secs: std::env::var("TASK_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TASK_RETRY_DELAY_SECS must be a valid u64"))?,
            queue_poll_interval_ms: std::env::var("QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_POLL_INTERVAL_MS must be a valid u64"))?,
        })
    }

    /// The configured retry delay as a `Duration`.
    pub fn task_retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.task_retry_delay_secs)
    }
}
