//! In-process task queue built on `async-channel`.
//!
//! Delayed tasks are parked on a tokio timer and re-sent when it fires. Nothing
//! survives a restart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{DEAD_LETTER_CAPACITY, QueueError, TaskQueue};
use crate::task::DispatchTask;

/// How long `next` waits before reporting an empty queue.
const DEFAULT_POLL_WINDOW: Duration = Duration::from_millis(250);

pub struct InMemoryTaskQueue {
    sender: async_channel::Sender<DispatchTask>,
    receiver: async_channel::Receiver<DispatchTask>,
    scheduled: Arc<AtomicUsize>,
    dead_letters: Mutex<VecDeque<DispatchTask>>,
    poll_window: Duration,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            scheduled: Arc::new(AtomicUsize::new(0)),
            dead_letters: Mutex::new(VecDeque::new()),
            poll_window: DEFAULT_POLL_WINDOW,
        }
    }

    pub fn with_poll_window(mut self, poll_window: Duration) -> Self {
        self.poll_window = poll_window;
        self
    }

    /// Tasks ready to run right now.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Tasks waiting on a retry timer.
    pub fn scheduled_len(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Snapshot of terminally failed tasks, oldest first.
    pub fn dead_letters(&self) -> Vec<DispatchTask> {
        self.dead_letters
            .lock()
            .map(|tasks| tasks.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        self.sender
            .send(task)
            .await
            .map_err(|_| QueueError::Closed)
    }

    async fn schedule(&self, task: DispatchTask, delay: Duration) -> Result<(), QueueError> {
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }

        let sender = self.sender.clone();
        let scheduled = self.scheduled.clone();
        scheduled.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let task_id = task.id;
            if sender.send(task).await.is_err() {
                tracing::warn!(task_id = %task_id, "Queue closed before scheduled task was due");
            }
            scheduled.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn next(&self) -> Result<Option<DispatchTask>, QueueError> {
        match tokio::time::timeout(self.poll_window, self.receiver.recv()).await {
            Ok(Ok(task)) => Ok(Some(task)),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn dead_letter(&self, task: DispatchTask) -> Result<(), QueueError> {
        let mut tasks = self.dead_letters.lock().map_err(|_| QueueError::Poisoned)?;
        tasks.push_back(task);
        while tasks.len() > DEAD_LETTER_CAPACITY {
            tasks.pop_front();
        }
        Ok(())
    }
}
