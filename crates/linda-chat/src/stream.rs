use crate::errors::StreamFailure;
use crate::message::MessageId;

/// Events exposed by `StreamHandle`.
///
/// Every stream yields `Started`, then zero or more `Token`s (the first one
/// preceded by `FirstContent`), then exactly one `Done` or `Error`. A
/// cancelled stream simply stops yielding events.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Started {
        stream_id: uuid::Uuid,
        message_id: MessageId,
    },
    /// The first non-empty addition arrived. Fires once per stream.
    FirstContent { message_id: MessageId },
    /// New text appended to the assistant message.
    Token {
        message_id: MessageId,
        seq: u64,
        text: String,
    },
    /// Terminal success with the final (trimmed) content. The message stays
    /// in the conversation, even when the reply was empty.
    Done {
        message_id: MessageId,
        content: String,
    },
    /// Terminal failure. Any content received before the failure is kept.
    Error {
        message_id: MessageId,
        failure: StreamFailure,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
