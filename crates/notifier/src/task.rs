//! Dispatch task: the retryable unit of work that delivers one message.
//!
//! State machine:
//!
//! ```text
//! Pending ──► Executing ──► Succeeded
//!                │
//!                ├──► RetryScheduled ──► Executing ...
//!                │
//!                └──► Failed
//! ```
//!
//! Every messaging API error counts against the retry budget. While failed
//! attempts are below `max_attempts` the task moves to `RetryScheduled` and the
//! worker hands it back to the queue with a fixed delay; the attempt that
//! exhausts the budget moves it to `Failed`. A task is only ever mutated by the
//! worker currently holding it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zpark_common::config::AppConfig;
use zpark_common::types::{DispatchOutcome, TaskId, TaskPayload, TaskState};
use zpark_engine::resolver::AddressResolver;

use crate::messaging::{ExternalApiError, MessagingApi};

/// Default number of attempts before a task fails.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(20);

/// Retry budget applied to new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_delay: Duration,
}

impl RetryPolicy {
    /// A budget of at least one attempt is always enforced.
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.task_max_attempts, config.task_retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Terminal or invalid outcomes of running a task.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    RetryBudgetExhausted {
        attempts: u32,
        source: ExternalApiError,
    },

    #[error("task cannot execute from state {0}")]
    InvalidTransition(TaskState),
}

/// What the worker must do after an execution step.
#[derive(Debug)]
pub enum Transition {
    /// The message was created; nothing further to do.
    Succeeded(DispatchOutcome),
    /// Hand the task back to the queue to run again after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// The retry budget is spent.
    Failed(DispatchError),
}

/// A queued message delivery and its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub id: TaskId,
    pub payload: TaskPayload,
    /// Failed attempts so far; never decreases.
    attempt: u32,
    max_attempts: u32,
    retry_delay_ms: u64,
    state: TaskState,
    message_id: Option<String>,
    last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl DispatchTask {
    /// Create a pending task for `payload` under `policy`.
    pub fn new(payload: TaskPayload, policy: &RetryPolicy) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            attempt: 0,
            max_attempts: policy.max_attempts(),
            retry_delay_ms: policy.retry_delay().as_millis() as u64,
            state: TaskState::Pending,
            message_id: None,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run one attempt against the messaging API and advance the state machine.
    ///
    /// Only `Pending` and `RetryScheduled` tasks may execute; anything else is
    /// rejected without touching the attempt counter.
    pub async fn execute(&mut self, api: &dyn MessagingApi) -> Result<Transition, DispatchError> {
        self.begin()?;

        let destination = AddressResolver::resolve(&self.payload.to);
        let attempt = self.attempt + 1;

        match api
            .send(
                &destination,
                &self.payload.text,
                self.payload.markdown.as_deref(),
            )
            .await
        {
            Ok(sent) => {
                tracing::info!(
                    task_id = %self.id,
                    destination = %destination,
                    message_id = %sent.id,
                    room_id = ?sent.room_id,
                    to_person_email = ?sent.to_person_email,
                    attempt,
                    "Message created"
                );
                Ok(self.succeed(sent.id))
            }
            Err(e) => {
                tracing::error!(
                    task_id = %self.id,
                    destination = %destination,
                    attempt,
                    max_attempts = self.max_attempts,
                    error = %e,
                    "Messaging API returned an error"
                );
                Ok(self.fail(e))
            }
        }
    }

    fn begin(&mut self) -> Result<(), DispatchError> {
        match self.state {
            TaskState::Pending | TaskState::RetryScheduled => {
                self.state = TaskState::Executing;
                Ok(())
            }
            other => Err(DispatchError::InvalidTransition(other)),
        }
    }

    fn succeed(&mut self, message_id: String) -> Transition {
        self.state = TaskState::Succeeded;
        self.message_id = Some(message_id.clone());
        Transition::Succeeded(DispatchOutcome { message_id })
    }

    fn fail(&mut self, error: ExternalApiError) -> Transition {
        self.attempt += 1;
        self.last_error = Some(error.to_string());

        if self.attempt < self.max_attempts {
            self.state = TaskState::RetryScheduled;
            Transition::RetryScheduled {
                attempt: self.attempt,
                delay: self.retry_delay(),
            }
        } else {
            self.state = TaskState::Failed;
            Transition::Failed(DispatchError::RetryBudgetExhausted {
                attempts: self.attempt,
                source: error,
            })
        }
    }
}
