//! Task queue abstraction and the submission client used by the API.
//!
//! Backends:
//! - [`RedisTaskQueue`]: shared broker for a multi-process deployment
//! - [`InMemoryTaskQueue`]: single-process queue, used by tests

pub mod memory;
pub mod redis_queue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use zpark_common::types::{OutboundMessage, TaskId, TaskPayload};

use crate::task::{DispatchTask, RetryPolicy};

pub use memory::InMemoryTaskQueue;
pub use redis_queue::RedisTaskQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue closed")]
    Closed,

    #[error("Queue state poisoned")]
    Poisoned,
}

/// Dead-lettered tasks kept before the oldest are dropped.
pub const DEAD_LETTER_CAPACITY: usize = 1000;

/// Storage and scheduling for dispatch tasks.
///
/// A task handed out by [`TaskQueue::next`] belongs to that caller alone until
/// it is scheduled again, dead-lettered, or completed.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Make a task available for immediate execution.
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError>;

    /// Make a task available again once `delay` has elapsed.
    async fn schedule(&self, task: DispatchTask, delay: Duration) -> Result<(), QueueError>;

    /// Wait for the next runnable task. `Ok(None)` means nothing arrived within
    /// the backend's poll window; callers simply ask again.
    async fn next(&self) -> Result<Option<DispatchTask>, QueueError>;

    /// Keep a terminally failed task for inspection.
    async fn dead_letter(&self, task: DispatchTask) -> Result<(), QueueError>;

    /// Release a delivered task. Backends that track in-flight tasks forget it
    /// here; a task never completed is eventually handed out again.
    async fn complete(&self, _id: TaskId) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Handle returned to the submitter as soon as a task is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
}

/// Wraps a composed message in a dispatch task and enqueues it.
#[derive(Clone)]
pub struct TaskQueueClient {
    queue: Arc<dyn TaskQueue>,
    policy: RetryPolicy,
}

impl TaskQueueClient {
    pub fn new(queue: Arc<dyn TaskQueue>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    /// Enqueue delivery of `message`. Returns without waiting for delivery.
    pub async fn submit(&self, message: OutboundMessage) -> Result<TaskHandle, QueueError> {
        let destination = message.destination.clone();
        let task = DispatchTask::new(TaskPayload::from(message), &self.policy);
        let id = task.id;

        self.queue.enqueue(task).await?;

        tracing::info!(
            task_id = %id,
            destination = %destination,
            "Dispatch task queued"
        );

        Ok(TaskHandle { id })
    }
}
