//! Line-oriented SSE frame codec.
//!
//! Upstream sends `data: <json>` lines separated by blank lines and finishes
//! with `data: [DONE]`. Chunks from the connection may split a line (or a
//! multi-byte character) anywhere, so bytes are buffered until a `\n` arrives
//! and only complete lines are ever decoded.

use serde_json::Value;

/// Prefix of every data line (the space after the colon is optional).
pub const DATA_PREFIX: &str = "data:";

/// Payload of the terminal frame.
pub const DONE_MARKER: &str = "[DONE]";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A `data:` line carrying a JSON payload.
    Json(Value),
    /// The terminal `data: [DONE]` line.
    Done,
    /// A `data:` line whose payload is not JSON; carries the raw line.
    Unparseable(String),
}

/// Incremental frame decoder.
///
/// Owns the carry-over between chunks. After [`FrameDecoder::feed`] returns,
/// the buffer never contains a `\n`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(frame) = decode_line(&self.buffer[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        frames
    }

    /// Decode whatever is left once the connection has closed.
    ///
    /// A final line without a trailing newline is still a complete line at EOF.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }

    /// Bytes of the trailing partial line.
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }
}

/// Decode one line (without its `\n`). Non-data lines (blank separators,
/// `event:`/`id:` fields, `:` comments) yield nothing.
fn decode_line(raw: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(raw);
    let line: &str = &line;
    let line = line.strip_suffix('\r').unwrap_or(line);

    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_MARKER {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(Frame::Json(value)),
        Err(e) => {
            tracing::debug!(error = %e, line = %line, "Passing through unparseable frame");
            Some(Frame::Unparseable(line.to_string()))
        }
    }
}

/// Format a JSON payload as an SSE data frame.
pub fn format_sse_data(data: &Value) -> String {
    format!("data: {}\n\n", data)
}

/// Format a raw upstream line as its own SSE event.
pub fn format_sse_raw(line: &str) -> String {
    format!("{}\n\n", line)
}

/// Format the SSE done marker.
pub fn format_sse_done() -> String {
    format!("data: {}\n\n", DONE_MARKER)
}
