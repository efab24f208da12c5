use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::emotion::{AvatarCue, EmotionRequest};
use crate::errors::ChatError;
use crate::message::Conversation;
use crate::session::ChatSession;
use crate::transport::{ChatTransport, HttpTransport, MemoryEntry, MemoryKind};

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) stream_buffer_capacity: usize,
    pub(crate) use_memory: bool,
}

/// Entry point for creating chat sessions against one chat proxy.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

impl ChatClient {
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::default()
    }

    /// Shortcut for an HTTP client built from `config`.
    pub fn from_config(config: ClientConfig) -> Result<Self, ChatError> {
        Self::builder().config(config).build()
    }

    /// Creates a session over `conversation` (usually restored from the
    /// store, or `Conversation::seeded` with a greeting).
    pub fn session(&self, conversation: Conversation) -> ChatSession {
        ChatSession::new(self.inner.clone(), conversation)
    }

    /// Asks the server to classify `text` for the avatar.
    pub async fn avatar_cue(
        &self,
        text: &str,
        persona: Option<&str>,
    ) -> Result<AvatarCue, ChatError> {
        let request = EmotionRequest {
            text: text.to_string(),
            persona: persona.map(ToOwned::to_owned),
        };
        self.inner.transport.classify_emotion(&request).await
    }

    /// Like [`Self::avatar_cue`], settling `current` instead of failing.
    pub async fn avatar_cue_or_settle(
        &self,
        text: &str,
        persona: Option<&str>,
        current: &AvatarCue,
    ) -> AvatarCue {
        match self.avatar_cue(text, persona).await {
            Ok(cue) => cue,
            Err(err) => {
                warn!(event = "emotion.classify_failed", error = %err);
                current.settle()
            }
        }
    }

    pub async fn validate_api_key(&self, key: &str) -> Result<bool, ChatError> {
        self.inner.transport.validate_api_key(key).await
    }

    /// Uses `key` for subsequent requests. `None` or a blank key clears it.
    pub fn set_api_key(&self, key: Option<String>) {
        info!(event = "config.api_key_changed", present = key.as_deref().is_some_and(|k| !k.trim().is_empty()));
        self.inner.transport.set_api_key(key);
    }

    pub async fn remember(&self, kind: MemoryKind, text: &str) -> Result<MemoryEntry, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Validation("memory text must not be empty".into()));
        }
        self.inner.transport.remember(kind, text).await
    }

    pub async fn search_memory(&self, query: &str, top_k: u8) -> Result<Vec<MemoryEntry>, ChatError> {
        self.inner.transport.search_memory(query, top_k).await
    }

    pub fn use_memory(&self) -> bool {
        self.inner.use_memory
    }
}

/// Builder for [`ChatClient`].
///
/// Either a transport or a config must be given. When both are set the
/// transport wins and the config only supplies the session options.
#[derive(Default)]
pub struct ChatClientBuilder {
    transport: Option<Arc<dyn ChatTransport>>,
    config: Option<ClientConfig>,
}

impl ChatClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ChatClient, ChatError> {
        let transport: Arc<dyn ChatTransport> = match (self.transport, &self.config) {
            (Some(transport), _) => transport,
            (None, Some(config)) => Arc::new(HttpTransport::new(config.clone())?),
            (None, None) => {
                return Err(ChatError::Config(
                    "a transport or a client config is required".into(),
                ));
            }
        };
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(ChatClient {
            inner: Arc::new(ClientInner {
                transport,
                stream_buffer_capacity: config.stream_buffer_capacity,
                use_memory: config.use_memory,
            }),
        })
    }
}
