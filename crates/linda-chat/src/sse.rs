//! Incremental decoder for `text/event-stream` bodies.
//!
//! The transport delivers bytes in order but with no regard for frame
//! boundaries, so the decoder carries the unterminated tail of every chunk
//! over to the next one.

/// Event type used when a frame carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One complete `event:`/`data:` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched without finding a terminator.
    scanned: usize,
}

impl SseDecoder {
    /// Appends `chunk` and returns every frame it completes, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        // A terminator is at most 4 bytes, so it can start up to 3 bytes
        // before the end of the previous search.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            from = 0;
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            } else {
                tracing::trace!(event = "stream.frame_dropped", bytes = idx as u64);
            }
        }
        self.scanned = self.buf.len();
        frames
    }

    /// Bytes waiting for a frame terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Parses one frame body (without its terminator).
///
/// Returns `None` for frames without any `data:` line: keep-alives, bare
/// comments, and event-only frames are not events.
pub fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        data: data_lines.join("\n"),
    })
}
