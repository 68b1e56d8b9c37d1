//! Messaging platform boundary.
//!
//! The dispatch core only talks to the platform through [`MessagingApi`], so
//! tests can swap in a scripted implementation for the real HTTP client.

use async_trait::async_trait;
use thiserror::Error;

use zpark_common::types::Destination;

/// A message the platform accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Platform-assigned message id
    pub id: String,
    pub room_id: Option<String>,
    pub to_person_email: Option<String>,
}

/// Any failure reported by, or while talking to, the messaging platform.
///
/// Every variant is treated as retryable by the dispatch task.
#[derive(Debug, Clone, Error)]
pub enum ExternalApiError {
    #[error("API returned {status}: {body} (trackingid: {tracking_id})")]
    Status {
        status: u16,
        body: String,
        tracking_id: String,
    },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Sends messages to the messaging platform.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Create a message at `destination`. Returns the created message on success.
    async fn send(
        &self,
        destination: &Destination,
        text: &str,
        markdown: Option<&str>,
    ) -> Result<SentMessage, ExternalApiError>;
}
