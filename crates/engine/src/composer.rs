//! Message composer: turns alert fields into outbound message text.
//!
//! No truncation or escaping happens here; payload limits belong to the
//! messaging platform.

use zpark_common::types::{AlertRequest, OutboundMessage};

use crate::resolver::AddressResolver;

/// Separator between subject and body.
const BODY_SEPARATOR: &str = "\n\n";

/// Builds outbound message text and payloads.
pub struct MessageComposer;

impl MessageComposer {
    /// Compose the message text from a subject and an optional body.
    ///
    /// An absent or empty body yields the subject alone.
    pub fn compose(subject: &str, message: Option<&str>) -> String {
        match message {
            Some(body) if !body.is_empty() => format!("{}{}{}", subject, BODY_SEPARATOR, body),
            _ => subject.to_string(),
        }
    }

    /// Resolve the destination and compose the text of a validated alert.
    pub fn outbound(alert: &AlertRequest) -> OutboundMessage {
        OutboundMessage {
            destination: AddressResolver::resolve(&alert.to),
            text: Self::compose(&alert.subject, alert.message.as_deref()),
            markdown: None,
        }
    }
}
