//! HTTP client for the Webex (formerly Spark) messages API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use zpark_common::types::Destination;

use crate::messaging::{ExternalApiError, MessagingApi, SentMessage};

/// Header the platform uses to correlate a request with its server-side logs.
const TRACKING_ID_HEADER: &str = "trackingid";

/// Request body for `POST /messages`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    to_person_email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_id: Option<&'a str>,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<&'a str>,
}

impl<'a> CreateMessage<'a> {
    fn new(destination: &'a Destination, text: &'a str, markdown: Option<&'a str>) -> Self {
        let (to_person_email, room_id) = match destination {
            Destination::DirectMessage(address) => (Some(address.as_str()), None),
            Destination::Room(id) => (None, Some(id.as_str())),
        };
        Self {
            to_person_email,
            room_id,
            text,
            markdown,
        }
    }
}

/// Subset of the message object returned by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    id: String,
    room_id: Option<String>,
    to_person_email: Option<String>,
}

/// Messaging API client backed by `reqwest`.
pub struct SparkClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl SparkClient {
    /// Creates a client for the API rooted at `base_url` (e.g. `https://webexapis.com/v1`).
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }
}

#[async_trait]
impl MessagingApi for SparkClient {
    #[instrument(skip(self, destination, text, markdown), fields(destination = %destination))]
    async fn send(
        &self,
        destination: &Destination,
        text: &str,
        markdown: Option<&str>,
    ) -> Result<SentMessage, ExternalApiError> {
        let body = CreateMessage::new(destination, text, markdown);

        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExternalApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let tracking_id = response
                .headers()
                .get(TRACKING_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalApiError::Status {
                status: status.as_u16(),
                body,
                tracking_id,
            });
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| ExternalApiError::Decode(e.to_string()))?;

        Ok(SentMessage {
            id: message.id,
            room_id: message.room_id,
            to_person_email: message.to_person_email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SparkClient {
        SparkClient::new(
            &format!("{}/v1/", server.uri()),
            "spark-token".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_direct_message_uses_person_email() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("authorization", "Bearer spark-token"))
            .and(body_json(json!({
                "toPersonEmail": "joel@zpark.packetmischief",
                "text": "Your data center is on fire"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "id123456",
                "toPersonEmail": "joel@zpark.packetmischief",
                "text": "Your data center is on fire",
                "created": "2017-08-09T00:26:11.937Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sent = client(&server)
            .send(
                &Destination::DirectMessage("joel@zpark.packetmischief".into()),
                "Your data center is on fire",
                None,
            )
            .await
            .unwrap();

        assert_eq!(sent.id, "id123456");
        assert_eq!(
            sent.to_person_email.as_deref(),
            Some("joel@zpark.packetmischief")
        );
        assert_eq!(sent.room_id, None);
    }

    #[tokio::test]
    async fn test_room_message_with_markdown() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_json(json!({
                "roomId": "roomid1234567",
                "text": "fire",
                "markdown": "**fire**"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "id789",
                "roomId": "roomid1234567"
            })))
            .mount(&server)
            .await;

        let sent = client(&server)
            .send(
                &Destination::Room("roomid1234567".into()),
                "fire",
                Some("**fire**"),
            )
            .await
            .unwrap();

        assert_eq!(sent.id, "id789");
        assert_eq!(sent.room_id.as_deref(), Some("roomid1234567"));
    }

    #[tokio::test]
    async fn test_rate_limited_is_status_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("trackingid", "ROUTER_abc")
                    .set_body_string("Too Many Requests"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .send(&Destination::Room("r".into()), "x", None)
            .await
            .unwrap_err();

        match err {
            ExternalApiError::Status {
                status,
                body,
                tracking_id,
            } => {
                assert_eq!(status, 429);
                assert_eq!(body, "Too Many Requests");
                assert_eq!(tracking_id, "ROUTER_abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send(&Destination::Room("r".into()), "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Reserve a free port, then release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = SparkClient::new(
            &format!("http://127.0.0.1:{}/v1", port),
            "spark-token".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client
            .send(&Destination::Room("r".into()), "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalApiError::Transport(_)));
    }
}
