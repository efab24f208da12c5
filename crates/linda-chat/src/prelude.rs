//! Common imports for typical client usage.
pub use crate::persona::{CLEAR_GREETING, WELCOME_GREETING};
pub use crate::{
    AbortHandle, AvatarCue, ChatClient, ChatError, ChatMessage, ClientConfig, Conversation,
    MessageId, Role, SessionState, StreamEvent, StreamFailure, StreamHandle, UserInput,
};
