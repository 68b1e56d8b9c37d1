//! End-to-end dispatch tests: submit through the queue client, run workers
//! against a scripted messaging API, observe the outcome.
//!
//! Time is paused, so the real 20 second retry delay elapses instantly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use zpark_common::types::{Destination, OutboundMessage, TaskId, TaskState};
use zpark_notifier::messaging::{ExternalApiError, MessagingApi, SentMessage};
use zpark_notifier::queue::{InMemoryTaskQueue, QueueError, TaskQueue, TaskQueueClient};
use zpark_notifier::task::{DispatchError, DispatchTask, RetryPolicy, Transition};
use zpark_notifier::worker::DispatchWorker;

// ============================================================
// Helpers
// ============================================================

/// Replays scripted results; once the script runs out every call succeeds.
struct ScriptedApi {
    script: Mutex<VecDeque<Result<SentMessage, ExternalApiError>>>,
    calls: AtomicUsize,
}

impl ScriptedApi {
    fn new(script: Vec<Result<SentMessage, ExternalApiError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingApi for ScriptedApi {
    async fn send(
        &self,
        _destination: &Destination,
        _text: &str,
        _markdown: Option<&str>,
    ) -> Result<SentMessage, ExternalApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(SentMessage {
                    id: format!("id{}", call),
                    room_id: None,
                    to_person_email: None,
                })
            })
    }
}

/// In-memory queue whose `schedule` and `dead_letter` fail a set number of
/// times before going through.
struct FlakyQueue {
    inner: InMemoryTaskQueue,
    schedule_failures: AtomicUsize,
    dead_letter_failures: AtomicUsize,
}

impl FlakyQueue {
    fn new(schedule_failures: usize, dead_letter_failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTaskQueue::new(),
            schedule_failures: AtomicUsize::new(schedule_failures),
            dead_letter_failures: AtomicUsize::new(dead_letter_failures),
        })
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        self.inner.enqueue(task).await
    }

    async fn schedule(&self, task: DispatchTask, delay: Duration) -> Result<(), QueueError> {
        if Self::take_failure(&self.schedule_failures) {
            return Err(QueueError::Closed);
        }
        self.inner.schedule(task, delay).await
    }

    async fn next(&self) -> Result<Option<DispatchTask>, QueueError> {
        self.inner.next().await
    }

    async fn dead_letter(&self, task: DispatchTask) -> Result<(), QueueError> {
        if Self::take_failure(&self.dead_letter_failures) {
            return Err(QueueError::Closed);
        }
        self.inner.dead_letter(task).await
    }

    async fn complete(&self, id: TaskId) -> Result<(), QueueError> {
        self.inner.complete(id).await
    }
}

fn api_error() -> Result<SentMessage, ExternalApiError> {
    Err(ExternalApiError::Status {
        status: 429,
        body: "Too Many Requests".to_string(),
        tracking_id: "none".to_string(),
    })
}

fn alert_message() -> OutboundMessage {
    OutboundMessage {
        destination: Destination::DirectMessage("joel@zpark.packetmischief".to_string()),
        text: "This might ruin your day...\n\nYour data center is on fire".to_string(),
        markdown: None,
    }
}

fn setup(
    api: Arc<ScriptedApi>,
) -> (Arc<InMemoryTaskQueue>, TaskQueueClient, DispatchWorker) {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let client = TaskQueueClient::new(queue.clone(), RetryPolicy::default());
    let worker = DispatchWorker::new(queue.clone(), api);
    (queue, client, worker)
}

/// Pull and process tasks until one reaches a terminal transition.
async fn drive_to_completion(queue: &dyn TaskQueue, worker: &DispatchWorker) -> Transition {
    let (_shutdown_tx, shutdown) = watch::channel(false);
    loop {
        let Some(task) = queue.next().await.unwrap() else {
            continue;
        };
        let transition = worker.process(task, &shutdown).await.unwrap();
        if !matches!(transition, Transition::RetryScheduled { .. }) {
            return transition;
        }
    }
}

// ============================================================
// Retry behaviour
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_single_failure_then_success() {
    let api = ScriptedApi::new(vec![
        api_error(),
        Ok(SentMessage {
            id: "id123456".to_string(),
            room_id: None,
            to_person_email: Some("joel@zpark.packetmischief".to_string()),
        }),
    ]);
    let (queue, client, worker) = setup(api.clone());
    let started = Instant::now();

    client.submit(alert_message()).await.unwrap();
    let transition = drive_to_completion(&*queue, &worker).await;

    match transition {
        Transition::Succeeded(outcome) => assert_eq!(outcome.message_id, "id123456"),
        other => panic!("unexpected transition: {other:?}"),
    }
    assert_eq!(api.calls(), 2);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_stops_after_three_attempts() {
    let api = ScriptedApi::new(vec![api_error(), api_error(), api_error(), api_error()]);
    let (queue, client, worker) = setup(api.clone());
    let started = Instant::now();

    let handle = client.submit(alert_message()).await.unwrap();
    let transition = drive_to_completion(&*queue, &worker).await;

    assert!(matches!(
        transition,
        Transition::Failed(DispatchError::RetryBudgetExhausted { attempts: 3, .. })
    ));
    assert_eq!(api.calls(), 3);
    // Two retries, each after the fixed delay
    assert!(started.elapsed() >= Duration::from_secs(40));

    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, handle.id);
    assert_eq!(dead[0].state(), TaskState::Failed);
    assert!(dead[0].last_error().unwrap().contains("429"));

    // Nothing left to run a fourth attempt
    assert!(queue.is_empty());
    assert_eq!(queue.scheduled_len(), 0);
    assert_eq!(queue.next().await.unwrap(), None);
    assert_eq!(api.calls(), 3);
}

// ============================================================
// Queue errors while handing a task back
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_retry_survives_schedule_error() {
    let api = ScriptedApi::new(vec![api_error()]);
    let queue = FlakyQueue::new(1, 0);
    let client = TaskQueueClient::new(queue.clone(), RetryPolicy::default());
    let worker = DispatchWorker::new(queue.clone(), api.clone());

    client.submit(alert_message()).await.unwrap();
    let transition = drive_to_completion(&*queue, &worker).await;

    assert!(matches!(transition, Transition::Succeeded(_)));
    assert_eq!(api.calls(), 2);
    assert_eq!(queue.schedule_failures.load(Ordering::SeqCst), 0);
    assert!(queue.inner.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dead_letter_survives_queue_errors() {
    let api = ScriptedApi::new(vec![api_error(), api_error(), api_error()]);
    let queue = FlakyQueue::new(0, 2);
    let client = TaskQueueClient::new(queue.clone(), RetryPolicy::default());
    let worker = DispatchWorker::new(queue.clone(), api.clone());

    let handle = client.submit(alert_message()).await.unwrap();
    let transition = drive_to_completion(&*queue, &worker).await;

    assert!(matches!(transition, Transition::Failed(_)));
    assert_eq!(api.calls(), 3);
    let dead = queue.inner.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, handle.id);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_error_during_shutdown_requeues_task() {
    let api = ScriptedApi::new(vec![api_error()]);
    let queue = FlakyQueue::new(usize::MAX, 0);
    let client = TaskQueueClient::new(queue.clone(), RetryPolicy::default());
    let worker = DispatchWorker::new(queue.clone(), api.clone());
    let (_shutdown_tx, shutdown) = watch::channel(true);

    let handle = client.submit(alert_message()).await.unwrap();
    let task = queue.next().await.unwrap().unwrap();
    let transition = worker.process(task, &shutdown).await.unwrap();

    assert!(matches!(transition, Transition::RetryScheduled { attempt: 1, .. }));
    let requeued = queue.inner.next().await.unwrap().unwrap();
    assert_eq!(requeued.id, handle.id);
    assert_eq!(requeued.state(), TaskState::RetryScheduled);
    assert_eq!(requeued.attempt(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_dead_letters_requeued_failed_task() {
    // Budget spent while the dead-letter store was down during shutdown
    let api = ScriptedApi::new(vec![api_error()]);
    let queue = FlakyQueue::new(0, 1);
    let client = TaskQueueClient::new(queue.clone(), RetryPolicy::new(1, Duration::from_secs(20)));
    let worker = DispatchWorker::new(queue.clone(), api.clone());

    let handle = client.submit(alert_message()).await.unwrap();
    let task = queue.next().await.unwrap().unwrap();
    let (_stopped_tx, stopped) = watch::channel(true);
    let transition = worker.process(task, &stopped).await.unwrap();
    assert!(matches!(transition, Transition::Failed(_)));
    assert!(queue.inner.dead_letters().is_empty());
    assert_eq!(queue.inner.len(), 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = tokio::spawn(async move { worker.run(1, shutdown_rx).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send(true).unwrap();
    pool.await.unwrap().unwrap();

    // Routed straight to the dead letters without another attempt
    assert_eq!(api.calls(), 1);
    let dead = queue.inner.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, handle.id);
    assert!(queue.inner.is_empty());
}

// ============================================================
// Worker pool
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_worker_pool_delivers_all_tasks() {
    let api = ScriptedApi::new(vec![api_error()]);
    let (queue, client, worker) = setup(api.clone());

    for _ in 0..5 {
        client.submit(alert_message()).await.unwrap();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = tokio::spawn(async move { worker.run(3, shutdown_rx).await });

    // Five first attempts plus one retry
    let deadline = Instant::now() + Duration::from_secs(120);
    while api.calls() < 6 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown_tx.send(true).unwrap();
    pool.await.unwrap().unwrap();

    assert_eq!(api.calls(), 6);
    assert!(queue.is_empty());
    assert_eq!(queue.scheduled_len(), 0);
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_stops_when_idle() {
    let api = ScriptedApi::new(vec![]);
    let (_queue, _client, worker) = setup(api.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = tokio::spawn(async move { worker.run(2, shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), pool)
        .await
        .expect("workers did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(api.calls(), 0);
}
