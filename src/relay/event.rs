//! Decoded stream events and synthetic chunk construction.

use super::frame::Frame;
use serde_json::{json, Value};

/// Delta fields carrying the reasoning side channel.
pub const REASONING_FIELDS: &[&str] = &["reasoning_content", "reasoning"];

/// One event produced by the upstream stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(DeltaEvent),
    Done,
    /// A line that could not be decoded; relayed verbatim.
    Unparseable(String),
}

impl From<Frame> for StreamEvent {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Json(chunk) => StreamEvent::Delta(DeltaEvent::from_chunk(chunk)),
            Frame::Done => StreamEvent::Done,
            Frame::Unparseable(line) => StreamEvent::Unparseable(line),
        }
    }
}

/// A decoded completion chunk together with its first choice's delta fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEvent {
    /// The chunk as upstream sent it.
    pub chunk: Value,
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl DeltaEvent {
    pub fn from_chunk(chunk: Value) -> Self {
        let delta = chunk.pointer("/choices/0/delta");
        let content = delta
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let reasoning = delta.and_then(|d| {
            REASONING_FIELDS
                .iter()
                .find_map(|field| d.get(*field).and_then(Value::as_str))
                .map(str::to_string)
        });

        Self {
            chunk,
            content,
            reasoning,
        }
    }

    /// Whether the chunk has a `choices[0].delta` object at all (usage-only
    /// chunks do not).
    pub fn has_delta(&self) -> bool {
        self.chunk
            .pointer("/choices/0/delta")
            .map(Value::is_object)
            .unwrap_or(false)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.chunk
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
    }
}

/// Shape shared by every chunk the relay writes for one exchange.
#[derive(Debug, Clone)]
pub struct ChunkTemplate {
    pub id: String,
    pub created: i64,
    /// Model id the client asked for; relayed chunks are rewritten to it.
    pub model: String,
}

impl ChunkTemplate {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    /// Build a content delta chunk that did not come from upstream.
    pub fn content_chunk(&self, content: &str) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": {"content": content},
                "finish_reason": null
            }]
        })
    }

    /// Build the closing chunk carrying a finish reason.
    pub fn finish_chunk(&self, finish_reason: &str) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": {"content": ""},
                "finish_reason": finish_reason
            }]
        })
    }

    /// Replace the chunk's `model` field with the client-facing model id.
    pub fn rewrite_model(&self, chunk: &mut Value) {
        if let Some(obj) = chunk.as_object_mut() {
            obj.insert("model".to_string(), Value::String(self.model.clone()));
        }
    }
}
