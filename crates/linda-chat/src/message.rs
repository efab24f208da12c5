use std::fmt;

use chrono::{DateTime, Utc};

use crate::errors::ChatError;

/// Client-generated message identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Uploaded image reference; only set on user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// True while tokens are still being appended.
    #[serde(default)]
    pub streaming: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            image_ref: None,
            streaming: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

/// `{role, content}` pair sent to the chat endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

/// What happened to a message when its stream stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settled {
    Finalized,
    Discarded,
    /// The message was no longer in the conversation.
    Missing,
}

/// Ordered message list.
///
/// At most one message is `streaming` at any time; `begin_assistant_stream`
/// refuses to open a second one.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation holding a single assistant greeting.
    pub fn seeded(greeting: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::assistant(greeting)],
        }
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn push(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.streaming).count()
    }

    /// Appends an empty assistant message flagged as streaming.
    pub fn begin_assistant_stream(&mut self) -> Result<MessageId, ChatError> {
        if let Some(active) = self.messages.iter().find(|m| m.streaming) {
            return Err(ChatError::protocol_msg(format!(
                "message {} is still streaming",
                active.id
            )));
        }
        let mut message = ChatMessage::assistant(String::new());
        message.streaming = true;
        Ok(self.push(message))
    }

    /// Appends text to a streaming message. Returns false if the message is
    /// gone or no longer streaming.
    pub fn append_to(&mut self, id: MessageId, text: &str) -> bool {
        match self.get_mut(id) {
            Some(message) if message.streaming => {
                message.content.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Trims trailing whitespace and clears the streaming flag.
    pub fn finalize(&mut self, id: MessageId) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                let trimmed = message.content.trim_end().len();
                message.content.truncate(trimmed);
                message.streaming = false;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: MessageId) -> Option<ChatMessage> {
        let idx = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(idx))
    }

    /// Finalizes the message, or removes it when it never received content.
    pub fn settle(&mut self, id: MessageId) -> Settled {
        match self.get(id) {
            None => Settled::Missing,
            Some(message) if message.content.trim().is_empty() => {
                self.remove(id);
                Settled::Discarded
            }
            Some(_) => {
                self.finalize(id);
                Settled::Finalized
            }
        }
    }

    /// Wire history: system prompts and empty messages are left out.
    pub fn history(&self) -> Vec<WireMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
            .map(|m| WireMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}
