//! Relay sinks: where orchestrated output goes.

use super::error::SinkClosed;
use super::frame::{format_sse_data, format_sse_done, format_sse_raw};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

/// One unit of downstream output.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A completion chunk.
    Chunk(Value),
    /// An upstream line relayed verbatim.
    Raw(String),
    /// An in-band error payload.
    Error(Value),
}

impl SinkEvent {
    /// SSE encoding of the event.
    pub fn to_sse(&self) -> String {
        match self {
            SinkEvent::Chunk(value) | SinkEvent::Error(value) => format_sse_data(value),
            SinkEvent::Raw(line) => format_sse_raw(line),
        }
    }
}

/// Ordered, append-only downstream transport.
///
/// `write` may suspend until the transport accepts more data; callers must
/// not issue the next write (or the next upstream call) before it returns.
#[async_trait]
pub trait RelaySink: Send {
    async fn write(&mut self, event: SinkEvent) -> Result<(), SinkClosed>;

    /// Emit the terminal sentinel. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), SinkClosed>;
}

/// Sink feeding SSE bytes into a bounded channel drained by the HTTP body.
///
/// A dropped receiver (client gone) makes every write fail immediately.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    frames_written: usize,
    closed: bool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            frames_written: 0,
            closed: false,
        }
    }

    /// Frames delivered so far, the terminal sentinel excluded.
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn send(&self, frame: String) -> Result<(), SinkClosed> {
        self.tx.send(Bytes::from(frame)).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl RelaySink for ChannelSink {
    async fn write(&mut self, event: SinkEvent) -> Result<(), SinkClosed> {
        if self.closed {
            return Err(SinkClosed);
        }
        self.send(event.to_sse()).await?;
        self.frames_written += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkClosed> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send(format_sse_done()).await
    }
}

/// Sink collecting everything in memory, used for non-streaming responses.
#[derive(Debug, Default)]
pub struct BufferSink {
    events: Vec<SinkEvent>,
    content: String,
    finish_reason: Option<String>,
    closed: bool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    /// Concatenated `content` of every chunk written.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Last non-null finish reason seen.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl RelaySink for BufferSink {
    async fn write(&mut self, event: SinkEvent) -> Result<(), SinkClosed> {
        if self.closed {
            return Err(SinkClosed);
        }
        if let SinkEvent::Chunk(chunk) = &event {
            if let Some(content) = chunk
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
            {
                self.content.push_str(content);
            }
            if let Some(reason) = chunk
                .pointer("/choices/0/finish_reason")
                .and_then(Value::as_str)
            {
                self.finish_reason = Some(reason.to_string());
            }
        }
        self.events.push(event);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkClosed> {
        self.closed = true;
        Ok(())
    }
}
