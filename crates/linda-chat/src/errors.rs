/// Terminal stream failure delivered through `StreamEvent::Error`.
///
/// This is the minimal structured payload the UI needs: a status code for
/// HTTP rejections, or a message for transport and server-side failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFailure {
    /// The chat endpoint answered with a non-success status.
    #[error("chat request failed with status {status}")]
    Status { status: u16 },
    /// Connecting or reading the body failed.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The server sent an `error` frame inside the event stream.
    #[error("server reported: {message}")]
    Server { message: String },
    /// The server answered, but not with an event stream.
    #[error("streaming is unavailable for this endpoint")]
    Unavailable,
}

impl StreamFailure {
    /// Returns the HTTP status carried by this failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// True when the credential was rejected and must be re-entered.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

/// Top-level error type for the public chat API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input (empty message, oversized image, etc.).
    #[error("validation error: {0}")]
    Validation(String),
    /// Connection refused, DNS failure, body read failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status. The body is kept for diagnostics only.
    #[error("request failed with status {status}")]
    Status { status: u16, body: String },
    /// A 2xx response that is not `text/event-stream`.
    #[error("server did not answer with an event stream")]
    StreamUnavailable,
    /// Response shape or internal sequencing was invalid.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Key-value store read or write failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// Terminal failure returned from a started stream.
    #[error(transparent)]
    Stream(StreamFailure),
    /// The stream was cancelled before it reached a terminal state.
    #[error("cancelled")]
    Cancelled,
}

impl ChatError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the HTTP status behind this error, if there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Stream(failure) => failure.status(),
            _ => None,
        }
    }

    /// True for 401/403: the stored API key is invalid and the user must
    /// provide a new one.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

impl From<StreamFailure> for ChatError {
    fn from(value: StreamFailure) -> Self {
        ChatError::Stream(value)
    }
}

pub(crate) fn stream_failure_from_error(err: &ChatError) -> StreamFailure {
    match err {
        ChatError::Status { status, .. } => StreamFailure::Status { status: *status },
        ChatError::StreamUnavailable => StreamFailure::Unavailable,
        ChatError::Stream(failure) => failure.clone(),
        other => StreamFailure::Transport {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_401_and_403_only() {
        for (status, expected) in [(401, true), (403, true), (404, false), (500, false)] {
            let err = ChatError::Status {
                status,
                body: String::new(),
            };
            assert_eq!(err.is_auth_failure(), expected, "status {status}");
        }
        assert!(ChatError::Stream(StreamFailure::Status { status: 403 }).is_auth_failure());
        assert!(!ChatError::Transport("offline".into()).is_auth_failure());
    }

    #[test]
    fn status_errors_map_to_status_failures() {
        let failure = stream_failure_from_error(&ChatError::Status {
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(failure, StreamFailure::Status { status: 500 });
        assert_eq!(
            stream_failure_from_error(&ChatError::StreamUnavailable),
            StreamFailure::Unavailable
        );
        assert!(matches!(
            stream_failure_from_error(&ChatError::Transport("dns".into())),
            StreamFailure::Transport { message } if message.contains("dns")
        ));
    }

    #[test]
    fn failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(StreamFailure::Status { status: 429 }).expect("json");
        assert_eq!(json, serde_json::json!({"kind": "status", "status": 429}));
    }
}
