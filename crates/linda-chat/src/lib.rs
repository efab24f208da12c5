//! Client library for the Linda chat proxy.
//!
//! Replies stream over Server-Sent Events and are folded into a
//! conversation as they arrive. Every stream can be cancelled, and once
//! cancelled it never touches the conversation again.
//!
//! # Streaming a reply
//!
//! ```no_run
//! use linda_chat::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let client = ChatClient::from_config(ClientConfig::from_env()?)?;
//! let session = client.session(Conversation::seeded(WELCOME_GREETING));
//! session.set_persona("Tsundere");
//!
//! let mut stream = session.send(UserInput::text("Halo Linda!")).await?;
//! while let Some(event) = stream.next_event().await {
//!     if let StreamEvent::Token { text, .. } = event {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Chat client entry point and builder.
pub mod client;
/// Client configuration.
pub mod config;
/// Avatar emotion cues.
pub mod emotion;
/// Public error types.
pub mod errors;
/// Transcript and JSON export.
pub mod export;
/// Image attachments.
pub mod image;
/// Messages and the conversation list.
pub mod message;
/// Mood model and greetings.
pub mod mood;
/// User-facing error notices.
pub mod notice;
/// Tracing subscriber setup.
pub mod observability;
/// Speaking styles.
pub mod persona;
/// Common imports.
pub mod prelude;
/// Token overlap reducer.
pub mod reducer;
/// Sessions, stream handles and cancellation.
pub mod session;
/// Keyboard shortcuts and slash commands.
pub mod shortcuts;
/// Incremental SSE decoding.
pub mod sse;
/// Chat statistics.
pub mod stats;
/// Local persistence.
pub mod store;
/// Stream events.
pub mod stream;
/// HTTP transport.
pub mod transport;

pub use client::{ChatClient, ChatClientBuilder};
pub use config::ClientConfig;
pub use emotion::{AvatarCue, Emotion, Expression};
pub use errors::{ChatError, StreamFailure};
pub use message::{ChatMessage, Conversation, MessageId, Role};
pub use session::{AbortHandle, CancelToken, ChatSession, SessionState, StreamHandle, UserInput};
pub use stream::StreamEvent;
pub use transport::{ChatTransport, HttpTransport, MemoryEntry, MemoryKind};
