//! Dispatch worker pool.
//!
//! Each worker loops: take a task from the queue, run one attempt, then act on
//! the resulting transition (done, reschedule, or dead-letter). A task is only
//! ever held by one worker, and a retry goes back through the queue rather than
//! sleeping in place.
//!
//! Handing a task back never gives up on a queue error: the worker backs off and
//! tries again until it succeeds or shutdown starts, and then falls back to
//! putting the task on the ready list.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::messaging::MessagingApi;
use crate::queue::{QueueError, TaskQueue};
use crate::task::{DispatchTask, Transition};

/// Backoff after the queue backend itself errors.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Where a task goes after an attempt that did not deliver it.
#[derive(Debug, Clone, Copy)]
enum Handoff {
    Retry(Duration),
    DeadLetter,
}

#[derive(Clone)]
pub struct DispatchWorker {
    queue: Arc<dyn TaskQueue>,
    api: Arc<dyn MessagingApi>,
}

impl DispatchWorker {
    pub fn new(queue: Arc<dyn TaskQueue>, api: Arc<dyn MessagingApi>) -> Self {
        Self { queue, api }
    }

    /// Run one attempt of `task` and route it according to the outcome.
    pub async fn process(
        &self,
        mut task: DispatchTask,
        shutdown: &watch::Receiver<bool>,
    ) -> anyhow::Result<Transition> {
        let transition = task.execute(self.api.as_ref()).await?;

        match &transition {
            Transition::Succeeded(outcome) => {
                tracing::info!(
                    task_id = %task.id,
                    message_id = %outcome.message_id,
                    attempts = task.attempt() + 1,
                    "Dispatch task succeeded"
                );
                if let Err(e) = self.queue.complete(task.id).await {
                    // The message is out; at worst the task runs again later
                    tracing::warn!(
                        task_id = %task.id,
                        error = %e,
                        "Failed to release delivered task"
                    );
                }
            }
            Transition::RetryScheduled { attempt, delay } => {
                tracing::warn!(
                    task_id = %task.id,
                    attempt,
                    max_attempts = task.max_attempts(),
                    retry_in_secs = delay.as_secs_f64(),
                    "Dispatch attempt failed, retry scheduled"
                );
                self.hand_off(task, Handoff::Retry(*delay), shutdown).await?;
            }
            Transition::Failed(e) => {
                tracing::error!(
                    task_id = %task.id,
                    to = %task.payload.to,
                    error = %e,
                    "Dispatch task failed"
                );
                self.hand_off(task, Handoff::DeadLetter, shutdown).await?;
            }
        }

        Ok(transition)
    }

    async fn hand_off(
        &self,
        task: DispatchTask,
        handoff: Handoff,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), QueueError> {
        loop {
            let result = match handoff {
                Handoff::Retry(delay) => self.queue.schedule(task.clone(), delay).await,
                Handoff::DeadLetter => self.queue.dead_letter(task.clone()).await,
            };

            let stopping = *shutdown.borrow();
            match result {
                Ok(()) => return Ok(()),
                Err(e) if stopping => {
                    tracing::warn!(
                        task_id = %task.id,
                        ?handoff,
                        error = %e,
                        "Queue error during shutdown, returning task to the ready list"
                    );
                    return self.queue.enqueue(task).await;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        ?handoff,
                        error = %e,
                        retry_in_secs = QUEUE_ERROR_BACKOFF.as_secs_f64(),
                        "Queue error while handing task back"
                    );
                    tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Run `concurrency` worker loops until `shutdown` flips to `true`.
    ///
    /// A worker finishes the attempt it is running before it stops.
    pub async fn run(
        &self,
        concurrency: usize,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut workers = JoinSet::new();

        for worker_id in 0..concurrency.max(1) {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { worker.run_loop(worker_id, shutdown).await });
        }

        tracing::info!(concurrency, "Dispatch workers started");

        while let Some(result) = workers.join_next().await {
            result?;
        }

        tracing::info!("Dispatch workers stopped");
        Ok(())
    }

    async fn run_loop(&self, worker_id: usize, shutdown: watch::Receiver<bool>) {
        // `next` returns within its poll window, so the flag is seen promptly.
        // Not racing it against shutdown keeps a popped task from being dropped.
        while !*shutdown.borrow() {
            match self.queue.next().await {
                // Only the shutdown fallback puts a failed task back on the ready list
                Ok(Some(task)) if task.state().is_terminal() => {
                    let task_id = task.id;
                    if let Err(e) = self.hand_off(task, Handoff::DeadLetter, &shutdown).await {
                        tracing::error!(
                            worker_id,
                            task_id = %task_id,
                            error = %e,
                            "Failed to dead-letter task"
                        );
                    }
                }
                Ok(Some(task)) => {
                    let task_id = task.id;
                    if let Err(e) = self.process(task, &shutdown).await {
                        tracing::error!(
                            worker_id,
                            task_id = %task_id,
                            error = %e,
                            "Failed to process dispatch task"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "Task queue error");
                    tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::debug!(worker_id, "Dispatch worker exiting");
    }
}
