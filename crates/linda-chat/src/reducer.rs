//! Folds `token` payloads into a monotonic content buffer.
//!
//! The chat proxy usually sends pure deltas but sometimes resends the
//! cumulative text so far. The reducer keeps the text it has accepted and
//! computes, for each incoming payload, the part that is actually new.
//!
//! The overlap rules are approximate: a genuinely new token that happens to
//! be a substring of the accepted text is dropped.

/// Result of applying one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    /// Text to append to the live message. Empty when the payload was a resend.
    pub addition: String,
    /// True for the first non-empty addition of the stream.
    pub first: bool,
}

/// Per-stream reducer state. Owned by exactly one stream task.
#[derive(Debug, Default, Clone)]
pub struct TokenReducer {
    previous: String,
    notified: bool,
}

impl TokenReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accepted so far (the concatenation of every addition).
    pub fn accepted(&self) -> &str {
        &self.previous
    }

    /// Applies `chunk` and returns the part that was new.
    pub fn apply(&mut self, chunk: &str) -> Reduction {
        let addition = addition(&self.previous, chunk);
        if addition.is_empty() {
            return Reduction {
                addition,
                first: false,
            };
        }
        self.previous.push_str(&addition);
        let first = !self.notified;
        self.notified = true;
        Reduction { addition, first }
    }
}

/// Computes the new text carried by `chunk` given the accepted `previous` text.
pub fn addition(previous: &str, chunk: &str) -> String {
    if let Some(rest) = chunk.strip_prefix(previous) {
        return rest.to_string();
    }
    if previous.ends_with(chunk) {
        return String::new();
    }
    if !previous.is_empty() && chunk.contains(previous) {
        return chunk.replacen(previous, "", 1);
    }
    if chunk.len() < previous.len() && previous.contains(chunk) {
        return String::new();
    }
    chunk.to_string()
}
