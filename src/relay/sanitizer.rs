//! Reasoning channel handling.
//!
//! Some upstream models stream their deliberation in a `reasoning_content`
//! delta field next to the answer `content`. Downstream clients only know
//! `content`, so the reasoning field is always stripped and, depending on
//! [`ReasoningDisplay`], either dropped or folded into `content` between
//! `<think>` markers.

use super::event::{DeltaEvent, REASONING_FIELDS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Opening wrapper emitted before the first reasoning fragment.
pub const REASONING_OPEN: &str = "<think>\n";

/// Closing wrapper emitted before the first content fragment after reasoning.
pub const REASONING_CLOSE: &str = "</think>\n\n";

/// How the reasoning channel is shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningDisplay {
    /// Reasoning is removed; content passes through.
    #[default]
    Suppressed,
    /// Reasoning is wrapped in `<think>` markers and emitted as content.
    Inlined,
    /// Like `Suppressed`; non-streaming responses also never prepend it.
    Hidden,
}

impl ReasoningDisplay {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningDisplay::Suppressed => "suppressed",
            ReasoningDisplay::Inlined => "inlined",
            ReasoningDisplay::Hidden => "hidden",
        }
    }
}

impl fmt::Display for ReasoningDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningDisplay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "suppressed" | "off" | "none" => Ok(ReasoningDisplay::Suppressed),
            "inlined" | "inline" | "show" => Ok(ReasoningDisplay::Inlined),
            "hidden" | "hidden-ignore" | "ignore" => Ok(ReasoningDisplay::Hidden),
            other => Err(format!("unknown reasoning display '{}'", other)),
        }
    }
}

/// Whether an inlined reasoning wrapper is currently open.
///
/// Lives for one exchange, across all of its phases.
#[derive(Debug, Default)]
pub struct ReasoningState {
    open: bool,
}

impl ReasoningState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Close an open wrapper, returning the marker to emit.
    pub fn close(&mut self) -> Option<&'static str> {
        if self.open {
            self.open = false;
            Some(REASONING_CLOSE)
        } else {
            None
        }
    }
}

/// Rewrite one chunk for downstream consumption.
///
/// The returned chunk never contains a reasoning field, and whenever it has a
/// `choices[0].delta` object that delta carries a string `content` (possibly
/// empty). Chunks without a delta (usage-only) are returned unchanged.
pub fn sanitize(event: &DeltaEvent, display: ReasoningDisplay, state: &mut ReasoningState) -> Value {
    let mut chunk = event.chunk.clone();
    let Some(delta) = chunk
        .pointer_mut("/choices/0/delta")
        .and_then(Value::as_object_mut)
    else {
        return chunk;
    };

    for field in REASONING_FIELDS {
        delta.remove(*field);
    }

    let content = match display {
        ReasoningDisplay::Inlined => {
            inline_reasoning(event.content.as_deref(), event.reasoning.as_deref(), state)
        }
        ReasoningDisplay::Suppressed | ReasoningDisplay::Hidden => {
            event.content.clone().unwrap_or_default()
        }
    };
    delta.insert("content".to_string(), Value::String(content));

    chunk
}

fn inline_reasoning(
    content: Option<&str>,
    reasoning: Option<&str>,
    state: &mut ReasoningState,
) -> String {
    let mut combined = String::new();

    if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
        if !state.open {
            combined.push_str(REASONING_OPEN);
            state.open = true;
        }
        combined.push_str(reasoning);
    }

    if let Some(content) = content.filter(|c| !c.is_empty()) {
        if let Some(close) = state.close() {
            combined.push_str(close);
        }
        combined.push_str(content);
    }

    combined
}

/// Combine a complete (non-streamed) message's reasoning and content.
pub fn merge_reasoning(content: &str, reasoning: Option<&str>, display: ReasoningDisplay) -> String {
    match (display, reasoning.filter(|r| !r.is_empty())) {
        (ReasoningDisplay::Inlined, Some(reasoning)) => {
            format!("{}{}\n{}{}", REASONING_OPEN, reasoning, REASONING_CLOSE, content)
        }
        _ => content.to_string(),
    }
}
