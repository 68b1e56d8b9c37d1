use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validated inbound alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRequest {
    /// Email-like address of a person, or an opaque room identifier
    pub to: String,
    pub subject: String,
    /// Optional body appended below the subject
    pub message: Option<String>,
}

/// Where an outbound message is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Destination {
    /// One-to-one message addressed by email.
    DirectMessage(String),
    /// Group conversation addressed by room id.
    Room(String),
}

impl Destination {
    /// The raw address or room id.
    pub fn target(&self) -> &str {
        match self {
            Destination::DirectMessage(address) => address,
            Destination::Room(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Destination::DirectMessage(_) => "direct",
            Destination::Room(_) => "room",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.target())
    }
}

/// A fully composed message ready to be handed to the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub destination: Destination,
    pub text: String,
    /// Optional rich-text rendering of `text`
    pub markdown: Option<String>,
}

/// Queue-carried form of an outbound message.
///
/// The destination travels as the raw `to` string and is classified again
/// when the task executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub to: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

impl From<OutboundMessage> for TaskPayload {
    fn from(message: OutboundMessage) -> Self {
        let to = match message.destination {
            Destination::DirectMessage(address) => address,
            Destination::Room(id) => id,
        };
        Self {
            to,
            text: message.text,
            markdown: message.markdown,
        }
    }
}

/// Identifier handed back to the HTTP caller for a queued dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Executing,
    RetryScheduled,
    Succeeded,
    Failed,
}

impl TaskState {
    /// Succeeded and Failed are final; nothing runs a task after either.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Executing => write!(f, "executing"),
            TaskState::RetryScheduled => write!(f, "retry_scheduled"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Identifier the messaging platform assigned to the created message
    pub message_id: String,
}
