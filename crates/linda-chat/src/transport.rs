//! HTTP seam between the client and the chat proxy.
//!
//! `ChatTransport` is the only thing the session knows about the network.
//! `HttpTransport` is the reqwest implementation; tests substitute fakes.

use std::pin::Pin;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::emotion::{AvatarCue, EmotionReply, EmotionRequest};
use crate::errors::ChatError;
use crate::message::WireMessage;

/// Header carrying the user's API key.
pub const API_KEY_HEADER: &str = "X-Gemini-Api-Key";
/// Reply used by the non-streaming path when the server sends none.
pub const DEFAULT_REPLY: &str = "Baik. Ada lagi?";

pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, ChatError>> + Send + 'static>>;

/// Body of a chat request.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Serialized as `null` when no image is attached.
    pub image_base64: Option<String>,
    pub use_memory: bool,
}

/// Category of a server-side memory entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Preference,
    Fact,
    Todo,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Todo => "todo",
        }
    }
}

impl FromStr for MemoryKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "todo" => Ok(Self::Todo),
            other => Err(ChatError::Validation(format!(
                "memory kind must be preference, fact or todo, got {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct MemoryEntry {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Network operations the chat client needs.
///
/// Only the two chat paths are mandatory; the auxiliary endpoints default to
/// a config error so minimal transports stay small.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Opens the streaming chat request.
    ///
    /// Implementations must check the status before handing out the body:
    /// a non-success status is `ChatError::Status` and no stream is returned.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError>;

    /// Non-streaming fallback returning the whole reply.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError>;

    /// Clears the server-side session and memory.
    async fn reset(&self) -> Result<(), ChatError> {
        Err(unsupported("reset"))
    }

    async fn classify_emotion(&self, _request: &EmotionRequest) -> Result<AvatarCue, ChatError> {
        Err(unsupported("emotion"))
    }

    /// Returns whether the server accepts `key`.
    async fn validate_api_key(&self, _key: &str) -> Result<bool, ChatError> {
        Err(unsupported("api key validation"))
    }

    async fn remember(&self, _kind: MemoryKind, _text: &str) -> Result<MemoryEntry, ChatError> {
        Err(unsupported("memory"))
    }

    async fn search_memory(
        &self,
        _query: &str,
        _top_k: u8,
    ) -> Result<Vec<MemoryEntry>, ChatError> {
        Err(unsupported("memory"))
    }

    /// Replaces the API key used for subsequent requests.
    fn set_api_key(&self, _key: Option<String>) {}
}

fn unsupported(what: &str) -> ChatError {
    ChatError::Config(format!("{what} is not supported by this transport"))
}

/// reqwest-backed transport for the Linda chat proxy.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
    api_key: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        // No overall deadline on the client: a streamed reply may take longer
        // than `timeout` as long as bytes keep arriving.
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        let api_key = RwLock::new(config.api_key.clone());
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A request that must finish within the configured timeout.
    fn call(&self, path: &str) -> reqwest::RequestBuilder {
        self.post(path).timeout(self.config.timeout)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(self.config.endpoint(path));
        let key = self
            .api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(key) = key {
            req = req.header(API_KEY_HEADER, key);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ChatError> {
        let response = req
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(ChatError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        debug!(
            event = "stream.request",
            messages = request.messages.len() as u64,
            has_image = request.image_base64.is_some(),
            use_memory = request.use_memory
        );
        let response = self
            .send(
                self.post("chat")
                    .header(ACCEPT, "text/event-stream")
                    .json(request),
            )
            .await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("application/json") {
            return Err(ChatError::StreamUnavailable);
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatError::Transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let response = self.send(self.call("chat").json(request)).await?;
        let value = match response.json::<serde_json::Value>().await {
            Ok(value) => value,
            Err(e) => {
                warn!(event = "chat.reply_unparsed", error = %e);
                serde_json::Value::Null
            }
        };
        Ok(extract_reply(&value).unwrap_or_else(|| DEFAULT_REPLY.to_string()))
    }

    async fn reset(&self) -> Result<(), ChatError> {
        self.send(self.call("reset")).await?;
        Ok(())
    }

    async fn classify_emotion(&self, request: &EmotionRequest) -> Result<AvatarCue, ChatError> {
        let response = self.send(self.call("emotion").json(request)).await?;
        let reply: EmotionReply = response
            .json()
            .await
            .map_err(|e| ChatError::Protocol(format!("invalid emotion response: {e}")))?;
        Ok(reply.into())
    }

    async fn validate_api_key(&self, key: &str) -> Result<bool, ChatError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ChatError::Validation("API key must not be empty".into()));
        }
        let req = self
            .client
            .post(self.config.endpoint("validate-api-key"))
            .timeout(self.config.timeout)
            .header(API_KEY_HEADER, key)
            .json(&serde_json::json!({}));
        let response = match self.send(req).await {
            Ok(response) => response,
            Err(ChatError::Status {
                status: 400 | 401 | 403,
                ..
            }) => return Ok(false),
            Err(err) => return Err(err),
        };
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Protocol(format!("invalid validation response: {e}")))?;
        Ok(value.get("valid").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn remember(&self, kind: MemoryKind, text: &str) -> Result<MemoryEntry, ChatError> {
        let body = serde_json::json!({ "type": kind, "text": text });
        let response = self.send(self.call("memory/upsert").json(&body)).await?;
        #[derive(serde::Deserialize)]
        struct Stored {
            memory: MemoryEntry,
        }
        let stored: Stored = response
            .json()
            .await
            .map_err(|e| ChatError::Protocol(format!("invalid memory response: {e}")))?;
        Ok(stored.memory)
    }

    async fn search_memory(&self, query: &str, top_k: u8) -> Result<Vec<MemoryEntry>, ChatError> {
        let body = serde_json::json!({ "query": query, "top_k": top_k.clamp(1, 25) });
        let response = self.send(self.call("memory/search").json(&body)).await?;
        #[derive(serde::Deserialize)]
        struct Found {
            #[serde(default)]
            results: Vec<MemoryEntry>,
        }
        let found: Found = response
            .json()
            .await
            .map_err(|e| ChatError::Protocol(format!("invalid memory search response: {e}")))?;
        Ok(found.results)
    }

    fn set_api_key(&self, key: Option<String>) {
        let key = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) = key;
    }
}

/// Picks the reply text out of a non-streaming response body.
pub(crate) fn extract_reply(value: &serde_json::Value) -> Option<String> {
    [
        value.get("reply"),
        value.get("data").and_then(|d| d.get("reply")),
        value.get("output"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str())
    .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(ClientConfig::default().base_url(server.uri()).api_key("k-1"))
            .expect("transport")
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![WireMessage {
                role: Role::User,
                content: "halo".into(),
            }],
            persona: Some("Tsundere".into()),
            image_base64: None,
            use_memory: false,
        }
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[test]
    fn request_serializes_null_image_and_skips_missing_persona() {
        let body = serde_json::to_value(ChatRequest::default()).expect("json");
        assert_eq!(
            body,
            serde_json::json!({"messages": [], "image_base64": null, "use_memory": false})
        );
    }

    #[test]
    fn reply_is_found_in_any_known_shape() {
        let cases = [
            (serde_json::json!({"reply": "a"}), Some("a")),
            (serde_json::json!({"data": {"reply": "b"}}), Some("b")),
            (serde_json::json!({"output": "c"}), Some("c")),
            (serde_json::json!({"reply": 1, "output": "d"}), Some("d")),
            (serde_json::json!({}), None),
        ];
        for (value, expected) in cases {
            assert_eq!(extract_reply(&value).as_deref(), expected, "{value}");
        }
    }

    #[test]
    fn memory_kind_parses_case_insensitively() {
        assert_eq!("Fact".parse::<MemoryKind>().expect("kind"), MemoryKind::Fact);
        assert!("note".parse::<MemoryKind>().is_err());
    }

    #[tokio::test]
    async fn open_stream_sends_sse_accept_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(header("accept", "text/event-stream"))
            .and(header(API_KEY_HEADER, "k-1"))
            .and(body_partial_json(serde_json::json!({"persona": "Tsundere"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("event: token\ndata: Hi\n\n", "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stream = transport_for(&server)
            .open_stream(&request())
            .await
            .expect("stream");
        assert_eq!(collect(stream).await, b"event: token\ndata: Hi\n\n");
    }

    /// Serves one chunked `text/event-stream` response, writing a token frame
    /// every `gap`.
    async fn slow_sse_server(frames: usize, gap: std::time::Duration) -> String {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
                )
                .await
                .expect("head");
            for i in 0..frames {
                let frame = format!("event: token\ndata: t{i}\n\n");
                let chunk = format!("{:x}\r\n{frame}\r\n", frame.len());
                socket.write_all(chunk.as_bytes()).await.expect("chunk");
                tokio::time::sleep(gap).await;
            }
            socket.write_all(b"0\r\n\r\n").await.expect("end");
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stream_outlives_timeout_while_bytes_keep_arriving() {
        let base = slow_sse_server(6, std::time::Duration::from_millis(150)).await;
        let transport = HttpTransport::new(
            ClientConfig::default()
                .base_url(base)
                .timeout(std::time::Duration::from_millis(400)),
        )
        .expect("transport");

        let stream = transport.open_stream(&request()).await.expect("stream");
        let body = String::from_utf8(collect(stream).await).expect("utf8");
        assert_eq!(body.matches("event: token").count(), 6);
        assert!(body.contains("data: t5"));
    }

    #[tokio::test]
    async fn open_stream_surfaces_status_without_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = match transport_for(&server).open_stream(&request()).await {
            Ok(_) => panic!("401 must not stream"),
            Err(err) => err,
        };
        assert_eq!(
            err,
            ChatError::Status {
                status: 401,
                body: "bad key".into()
            }
        );
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn json_answer_means_stream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"reply": "x"})))
            .mount(&server)
            .await;

        let result = transport_for(&server).open_stream(&request()).await;
        assert!(matches!(result, Err(ChatError::StreamUnavailable)));
    }

    #[tokio::test]
    async fn complete_falls_back_to_default_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let reply = transport_for(&server)
            .complete(&request())
            .await
            .expect("reply");
        assert_eq!(reply, DEFAULT_REPLY);
    }

    #[tokio::test]
    async fn emotion_response_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emotion"))
            .and(body_partial_json(serde_json::json!({"text": "yay"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"emotion": "excited", "headSwaySpeed": 3.0, "wink": true}),
            ))
            .mount(&server)
            .await;

        let cue = transport_for(&server)
            .classify_emotion(&EmotionRequest {
                text: "yay".into(),
                persona: None,
            })
            .await
            .expect("cue");
        assert_eq!(cue.emotion, crate::emotion::Emotion::Excited);
        assert_eq!(cue.head_sway_speed, crate::emotion::SWAY_MAX);
        assert!(cue.wink);
    }

    #[tokio::test]
    async fn api_key_validation_reads_valid_flag_and_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate-api-key"))
            .and(header(API_KEY_HEADER, "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/validate-api-key"))
            .and(header(API_KEY_HEADER, "bad"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        assert!(transport.validate_api_key(" good ").await.expect("good"));
        assert!(!transport.validate_api_key("bad").await.expect("bad"));
        assert!(matches!(
            transport.validate_api_key("  ").await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn memory_endpoints_round_trip_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/memory/upsert"))
            .and(body_partial_json(serde_json::json!({"type": "fact"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "memory": {"id": 7, "type": "fact", "text": "suka kopi", "created_at": "2024-01-01"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/memory/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"id": 7, "type": "fact", "text": "suka kopi"}]
            })))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let stored = transport
            .remember(MemoryKind::Fact, "suka kopi")
            .await
            .expect("stored");
        assert_eq!(stored.id, Some(7));
        let found = transport.search_memory("kopi", 3).await.expect("found");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "suka kopi");
    }

    #[tokio::test]
    async fn set_api_key_replaces_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reset"))
            .and(header(API_KEY_HEADER, "k-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.set_api_key(Some("k-2".into()));
        transport.reset().await.expect("reset");
    }
}
