//! REST backend sink.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::session::core::config::BackendConfig;
use crate::session::core::errors::{SessionError, SessionResult};
use crate::session::core::ids::ConversationId;
use crate::session::core::message::{Message, Role};
use crate::session::engine::summary::SessionSummary;
use crate::session::sink::{DurableSink, SinkFuture};

#[derive(Serialize)]
struct MessagePayload<'a> {
    conversation_id: &'a ConversationId,
    role: Role,
    content: &'a str,
    timestamp: DateTime<Utc>,
    sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecentMessages {
    Wrapped { messages: Vec<Message> },
    Bare(Vec<Message>),
}

impl RecentMessages {
    fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Wrapped { messages } | Self::Bare(messages) => messages,
        }
    }
}

/// Sink that persists through the conversation backend's REST API.
///
/// Requests carry `Authorization: Bearer <api_key>` when a key is configured.
pub struct HttpSink {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpSink {
    /// Build a sink from backend settings.
    ///
    /// # Errors
    /// Returns an error if no base URL is configured, it does not parse, or the
    /// HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> SessionResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| SessionError::InvalidConfig("http sink needs a backend url".to_string()))?;
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SessionError::InvalidConfig(format!(
                "backend url {base_url} cannot be a base"
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> SessionResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SessionError::InvalidConfig("backend url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn messages_url(&self, conversation_id: &ConversationId) -> SessionResult<Url> {
        self.endpoint(&["api", "v1", "conversations", conversation_id.as_str(), "messages"])
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> SessionResult<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // 408 and 429 may succeed later; other client errors never will.
        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            return Err(SessionError::SinkRejected {
                operation,
                status: status.as_u16(),
            });
        }
        Err(SessionError::Sink(format!(
            "{operation} returned HTTP {}",
            status.as_u16()
        )))
    }
}

impl DurableSink for HttpSink {
    fn write_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message: &'a Message,
    ) -> SinkFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let url = self.messages_url(conversation_id)?;
            let payload = MessagePayload {
                conversation_id,
                role: message.role,
                content: &message.content,
                timestamp: message.timestamp,
                sequence: message.sequence,
                metadata: message.metadata.as_ref(),
            };
            self.send("write_message", self.client.post(url).json(&payload))
                .await?;
            debug!(
                conversation_id = %conversation_id,
                sequence = message.sequence,
                "Posted message to backend"
            );
            Ok(())
        })
    }

    fn write_summary<'a>(
        &'a self,
        summary: &'a SessionSummary,
    ) -> SinkFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "v1", "sessions", "save"])?;
            self.send("write_summary", self.client.post(url).json(summary))
                .await?;
            Ok(())
        })
    }

    fn read_recent_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        limit: usize,
    ) -> SinkFuture<'a, SessionResult<Vec<Message>>> {
        Box::pin(async move {
            let mut url = self.messages_url(conversation_id)?;
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
            let response = self
                .send("read_recent_messages", self.client.get(url))
                .await?;
            let mut messages = response.json::<RecentMessages>().await?.into_messages();
            messages.sort_by_key(|message| message.sequence);
            let excess = messages.len().saturating_sub(limit);
            messages.drain(..excess);
            Ok(messages)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::core::context::SessionContext;
    use crate::session::core::errors::SessionWarnings;
    use crate::session::core::ids::SessionId;
    use crate::session::state::participants::ParticipantSnapshot;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink(base_url: &str) -> HttpSink {
        let config = BackendConfig {
            base_url: Some(base_url.to_string()),
            api_key: Some("secret".to_string()),
            request_timeout_ms: 500,
        };
        HttpSink::new(&config).unwrap()
    }

    #[test]
    fn test_messages_url_escapes_conversation_id() {
        let sink = sink("https://backend.example.com/");
        let url = sink.messages_url(&ConversationId::new("room 1/a")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://backend.example.com/api/v1/conversations/room%201%2Fa/messages"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let sink = sink("https://backend.example.com/voice");
        let url = sink.endpoint(&["api", "v1", "sessions", "save"]).unwrap();
        assert_eq!(url.as_str(), "https://backend.example.com/voice/api/v1/sessions/save");
    }

    #[test]
    fn test_missing_base_url_is_rejected() {
        let result = HttpSink::new(&BackendConfig::default());
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_recent_messages_accepts_both_shapes() {
        let bare = r#"[{"role":"user","content":"hi","timestamp":"2024-01-01T00:00:00Z","sequence":1}]"#;
        let wrapped = format!(r#"{{"messages":{bare}}}"#);
        let from_bare: RecentMessages = serde_json::from_str(bare).unwrap();
        let from_wrapped: RecentMessages = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(from_bare.into_messages(), from_wrapped.into_messages());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient_error() {
        let sink = sink("http://127.0.0.1:9");
        let cid = ConversationId::new("c1");
        let message = Message::new(Role::User, "hi", Utc::now(), 1);
        let err = sink.write_message(&cid, &message).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_write_message_posts_authorized_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/conversations/c1/messages"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink(&server.uri());
        let message = Message::new(Role::User, "hi", Utc::now(), 7)
            .with_metadata(Some(json!({"source": "stt"})));
        sink.write_message(&ConversationId::new("c1"), &message)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["conversation_id"], "c1");
        assert_eq!(body["role"], "user");
        assert_eq!(body["content"], "hi");
        assert_eq!(body["sequence"], 7);
        assert_eq!(body["metadata"]["source"], "stt");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = sink(&server.uri());
        let message = Message::new(Role::User, "hi", Utc::now(), 1);
        let err = sink
            .write_message(&ConversationId::new("c1"), &message)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Sink(ref reason) if reason == "write_message returned HTTP 503"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/conversations/c1/messages"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/conversations/c2/messages"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let sink = sink(&server.uri());
        let message = Message::new(Role::User, "hi", Utc::now(), 1);
        let err = sink
            .write_message(&ConversationId::new("c1"), &message)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::SinkRejected {
                operation: "write_message",
                status: 422
            }
        ));
        assert!(!err.is_transient());

        let throttled = sink
            .write_message(&ConversationId::new("c2"), &message)
            .await
            .unwrap_err();
        assert!(throttled.is_transient());
    }

    #[tokio::test]
    async fn test_write_summary_posts_to_sessions_save() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/save"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let start = Utc::now();
        let mut context =
            SessionContext::new(SessionId::new("s1"), ConversationId::new("c1"), start);
        context.mark_ended(start);
        let summary = SessionSummary::build(
            &context,
            vec![Message::new(Role::User, "hi", start, 1)],
            ParticipantSnapshot::new(),
            1,
            SessionWarnings::new(),
        );
        sink(&server.uri()).write_summary(&summary).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["conversation_id"], "c1");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_read_recent_messages_orders_and_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/conversations/c1/messages"))
            .and(query_param("limit", "2"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"role": "assistant", "content": "m3", "timestamp": "2024-01-01T00:00:03Z", "sequence": 3},
                    {"role": "user", "content": "m1", "timestamp": "2024-01-01T00:00:01Z", "sequence": 1},
                    {"role": "user", "content": "m2", "timestamp": "2024-01-01T00:00:02Z", "sequence": 2}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = sink(&server.uri())
            .read_recent_messages(&ConversationId::new("c1"), 2)
            .await
            .unwrap();
        let sequences: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
        assert_eq!(messages[1].role, Role::Assistant);
    }
}
