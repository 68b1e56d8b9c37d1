//! Redis-backed task queue shared by the API and any number of workers.
//!
//! Layout:
//! - `zpark:tasks:ready`: LIST of runnable tasks (LPUSH in, RPOP out)
//! - `zpark:tasks:scheduled`: ZSET of delayed tasks scored by due time (epoch ms)
//! - `zpark:tasks:inflight`: HASH of task id to the entry a worker is holding
//! - `zpark:tasks:leases`: ZSET of in-flight task ids scored by lease expiry (epoch ms)
//! - `zpark:tasks:failed`: capped LIST of dead-lettered tasks
//!
//! Every move between keys runs as one Lua script or MULTI block, so a dropped
//! connection never leaves a task in neither place. A task taken by `next` stays
//! in the in-flight hash until the worker schedules, dead-letters or completes
//! it; if the lease runs out first the task goes back on the ready list.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use zpark_common::types::TaskId;

use super::{DEAD_LETTER_CAPACITY, QueueError, TaskQueue};
use crate::task::DispatchTask;

const DEFAULT_READY_KEY: &str = "zpark:tasks:ready";
const DEFAULT_SCHEDULED_KEY: &str = "zpark:tasks:scheduled";
const DEFAULT_INFLIGHT_KEY: &str = "zpark:tasks:inflight";
const DEFAULT_LEASES_KEY: &str = "zpark:tasks:leases";
const DEFAULT_FAILED_KEY: &str = "zpark:tasks:failed";

/// How long a worker may hold a task before it is handed out again. Well above
/// the messaging API timeout.
const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Due or expired tasks moved per poll.
const PROMOTE_BATCH: isize = 32;

/// KEYS: scheduled, ready. ARGV: now_ms, batch.
static PROMOTE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
        for _, entry in ipairs(due) do
            redis.call('ZREM', KEYS[1], entry)
            redis.call('LPUSH', KEYS[2], entry)
        end
        return #due
        ",
    )
});

/// KEYS: leases, inflight, ready. ARGV: now_ms, batch.
static RECLAIM_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
        for _, id in ipairs(expired) do
            local entry = redis.call('HGET', KEYS[2], id)
            redis.call('ZREM', KEYS[1], id)
            redis.call('HDEL', KEYS[2], id)
            if entry then
                redis.call('RPUSH', KEYS[3], entry)
            end
        end
        return #expired
        ",
    )
});

/// KEYS: ready, inflight, leases. ARGV: lease_expiry_ms.
static TAKE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local entry = redis.call('RPOP', KEYS[1])
        if not entry then
            return false
        end
        local id = cjson.decode(entry)['id']
        redis.call('HSET', KEYS[2], id, entry)
        redis.call('ZADD', KEYS[3], ARGV[1], id)
        return entry
        ",
    )
});

#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
    ready_key: String,
    scheduled_key: String,
    inflight_key: String,
    leases_key: String,
    failed_key: String,
    poll_interval: Duration,
    lease: Duration,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager, poll_interval: Duration) -> Self {
        Self {
            conn,
            ready_key: DEFAULT_READY_KEY.to_string(),
            scheduled_key: DEFAULT_SCHEDULED_KEY.to_string(),
            inflight_key: DEFAULT_INFLIGHT_KEY.to_string(),
            leases_key: DEFAULT_LEASES_KEY.to_string(),
            failed_key: DEFAULT_FAILED_KEY.to_string(),
            poll_interval,
            lease: DEFAULT_LEASE,
        }
    }

    /// Use a custom key prefix (e.g. to isolate test runs).
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.ready_key = format!("{}:tasks:ready", prefix);
        self.scheduled_key = format!("{}:tasks:scheduled", prefix);
        self.inflight_key = format!("{}:tasks:inflight", prefix);
        self.leases_key = format!("{}:tasks:leases", prefix);
        self.failed_key = format!("{}:tasks:failed", prefix);
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Move scheduled tasks whose due time has passed onto the ready list.
    pub async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let promoted: usize = PROMOTE_SCRIPT
            .key(&self.scheduled_key)
            .key(&self.ready_key)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            tracing::debug!(promoted, "Promoted due tasks to ready queue");
        }

        Ok(promoted)
    }

    /// Put in-flight tasks whose lease ran out back at the head of the ready list.
    pub async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let reclaimed: usize = RECLAIM_SCRIPT
            .key(&self.leases_key)
            .key(&self.inflight_key)
            .key(&self.ready_key)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if reclaimed > 0 {
            tracing::warn!(reclaimed, "Reclaimed tasks with expired leases");
        }

        Ok(reclaimed)
    }

    /// Most recent dead-lettered tasks, newest first.
    pub async fn dead_letters(&self, limit: isize) -> Result<Vec<DispatchTask>, QueueError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(&self.failed_key, 0, limit - 1).await?;
        entries
            .iter()
            .map(|entry| serde_json::from_str(entry).map_err(QueueError::from))
            .collect()
    }

    /// Pipeline that drops `id` from the in-flight set, for callers to extend.
    fn release(&self, id: TaskId) -> redis::Pipeline {
        let id = id.to_string();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hdel(&self.inflight_key, &id)
            .ignore()
            .zrem(&self.leases_key, &id)
            .ignore();
        pipe
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let entry = serde_json::to_string(&task)?;
        let _: () = self
            .release(task.id)
            .lpush(&self.ready_key, entry)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn schedule(&self, task: DispatchTask, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let due_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let entry = serde_json::to_string(&task)?;
        let _: () = self
            .release(task.id)
            .zadd(&self.scheduled_key, entry, due_at)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(task_id = %task.id, due_at, "Task scheduled");
        Ok(())
    }

    async fn next(&self) -> Result<Option<DispatchTask>, QueueError> {
        self.promote_due().await?;
        self.reclaim_expired().await?;

        let mut conn = self.conn.clone();
        let lease_expiry = Utc::now().timestamp_millis() + self.lease.as_millis() as i64;
        let entry: Option<String> = TAKE_SCRIPT
            .key(&self.ready_key)
            .key(&self.inflight_key)
            .key(&self.leases_key)
            .arg(lease_expiry)
            .invoke_async(&mut conn)
            .await?;

        match entry {
            Some(entry) => Ok(Some(serde_json::from_str(&entry)?)),
            None => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(None)
            }
        }
    }

    async fn dead_letter(&self, task: DispatchTask) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let entry = serde_json::to_string(&task)?;
        let _: () = self
            .release(task.id)
            .lpush(&self.failed_key, entry)
            .ignore()
            .ltrim(&self.failed_key, 0, DEAD_LETTER_CAPACITY as isize - 1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn complete(&self, id: TaskId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = self.release(id).query_async(&mut conn).await?;
        Ok(())
    }
}
