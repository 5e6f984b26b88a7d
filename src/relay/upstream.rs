//! Upstream stream client.
//!
//! One [`Upstream::stream_call`] opens one streaming completion request and
//! returns an [`UpstreamStream`]: a pull-based sequence of [`StreamEvent`]s
//! decoded as bytes arrive, plus the text accumulated so far. Nothing is
//! buffered beyond the partial line the frame decoder has to hold back.

use super::error::StreamTransportError;
use super::event::{DeltaEvent, StreamEvent, REASONING_FIELDS};
use super::frame::FrameDecoder;
use super::request::UpstreamPayload;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Upstream chat-completion API.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Open a streaming completion call.
    async fn stream_call(&self, payload: &UpstreamPayload)
        -> Result<UpstreamStream, StreamTransportError>;

    /// Run a non-streaming completion call and return the raw response body.
    async fn complete(&self, payload: &UpstreamPayload) -> Result<Value, StreamTransportError>;
}

/// Serialized request body: the payload plus the call mode.
#[derive(Serialize)]
struct WireRequest<'a> {
    #[serde(flatten)]
    payload: &'a UpstreamPayload,
    stream: bool,
}

/// OpenAI-compatible upstream reached over HTTP with bearer authorization.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        payload: &UpstreamPayload,
        stream: bool,
    ) -> Result<reqwest::Response, StreamTransportError> {
        let url = self.endpoint();
        tracing::debug!(
            url = %url,
            model = %payload.model,
            messages = payload.messages.len(),
            stream,
            "Sending upstream request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&WireRequest { payload, stream })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    model = %payload.model,
                    is_timeout = e.is_timeout(),
                    is_connect = e.is_connect(),
                    error = %e,
                    "Upstream request failed"
                );
                StreamTransportError::from_reqwest(&e)
            })?;

        if !response.status().is_success() {
            return Err(read_status_error(response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn stream_call(
        &self,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamStream, StreamTransportError> {
        let deadline = Instant::now() + self.timeout;
        let response = self.send(payload, true).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamTransportError::from_reqwest(&e)));
        Ok(UpstreamStream::from_body(body).with_deadline(deadline))
    }

    async fn complete(&self, payload: &UpstreamPayload) -> Result<Value, StreamTransportError> {
        let response = self.send(payload, false).await?;
        response.json::<Value>().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to decode upstream completion");
            StreamTransportError::from_reqwest(&e)
        })
    }
}

/// Turn a non-2xx response into a transport error carrying upstream's status
/// and message.
async fn read_status_error(response: reqwest::Response) -> StreamTransportError {
    let status = response.status();
    let default_message = format!("HTTP {}", status);

    let message = match response.bytes().await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes)
            .ok()
            .as_ref()
            .and_then(extract_error_message)
            .or_else(|| {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .unwrap_or(default_message),
        Err(_) => default_message,
    };

    tracing::warn!(status = status.as_u16(), message = %message, "Upstream returned error status");
    StreamTransportError::status(status.as_u16(), message)
}

/// Extract the canonical error message from an upstream error payload.
pub fn extract_error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.as_str())
                .map(|s| s.to_string())
        })
        .or_else(|| {
            body.get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
}

/// Serves streaming calls from a non-streaming upstream by replaying the
/// finished completion word by word.
pub struct SimulatedUpstream {
    inner: Arc<dyn Upstream>,
    pacing: Duration,
}

impl SimulatedUpstream {
    pub fn new(inner: Arc<dyn Upstream>, pacing: Duration) -> Self {
        Self { inner, pacing }
    }
}

#[async_trait]
impl Upstream for SimulatedUpstream {
    async fn stream_call(
        &self,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamStream, StreamTransportError> {
        let completion = self.inner.complete(payload).await?;
        Ok(UpstreamStream::replay(&completion, self.pacing))
    }

    async fn complete(&self, payload: &UpstreamPayload) -> Result<Value, StreamTransportError> {
        self.inner.complete(payload).await
    }
}

enum Source {
    Body {
        body: BoxStream<'static, Result<Bytes, StreamTransportError>>,
        decoder: FrameDecoder,
    },
    Replay,
}

/// Lazily decoded events of one upstream call.
pub struct UpstreamStream {
    source: Source,
    pending: VecDeque<StreamEvent>,
    text: String,
    deadline: Option<Instant>,
    pacing: Duration,
    finished: bool,
}

impl UpstreamStream {
    /// Decode events from a raw SSE byte stream.
    pub fn from_body<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamTransportError>> + Send + 'static,
    {
        Self {
            source: Source::Body {
                body: body.boxed(),
                decoder: FrameDecoder::new(),
            },
            pending: VecDeque::new(),
            text: String::new(),
            deadline: None,
            pacing: Duration::ZERO,
            finished: false,
        }
    }

    /// Synthesize a stream from a finished (non-streaming) completion: the
    /// reasoning as one delta, the content split into words, then a chunk
    /// carrying the finish reason.
    pub fn replay(completion: &Value, pacing: Duration) -> Self {
        let id = completion
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("chatcmpl-replay");
        let model = completion.get("model").cloned().unwrap_or(Value::Null);
        let created = completion.get("created").cloned().unwrap_or(Value::Null);
        let message = completion.pointer("/choices/0/message");
        let content = message
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let reasoning = message.and_then(|m| {
            REASONING_FIELDS
                .iter()
                .find_map(|field| m.get(*field).and_then(Value::as_str))
        });
        let finish_reason = completion
            .pointer("/choices/0/finish_reason")
            .cloned()
            .unwrap_or(Value::Null);

        let chunk = |delta: Value, finish_reason: Value| {
            StreamEvent::Delta(DeltaEvent::from_chunk(json!({
                "id": id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
            })))
        };

        let mut pending = VecDeque::new();
        if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
            pending.push_back(chunk(json!({"reasoning_content": reasoning}), Value::Null));
        }
        for word in content.split_inclusive(char::is_whitespace) {
            pending.push_back(chunk(json!({"content": word}), Value::Null));
        }
        if !finish_reason.is_null() {
            pending.push_back(chunk(json!({}), finish_reason));
        }
        pending.push_back(StreamEvent::Done);

        Self {
            source: Source::Replay,
            pending,
            text: String::new(),
            deadline: None,
            pacing,
            finished: true,
        }
    }

    /// Fail with a timeout once `deadline` passes while waiting for bytes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Content accumulated from the deltas yielded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Next event, or `None` once the call has ended.
    ///
    /// After `Done` or an error nothing further is yielded.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, StreamTransportError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if !self.pacing.is_zero() && matches!(event, StreamEvent::Delta(_)) {
                    tokio::time::sleep(self.pacing).await;
                }
                return Some(Ok(self.observe(event)));
            }
            if self.finished {
                return None;
            }

            let Source::Body { body, decoder } = &mut self.source else {
                self.finished = true;
                continue;
            };

            let next = match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.finished = true;
                        return Some(Err(StreamTransportError::timeout()));
                    }
                },
                None => body.next().await,
            };

            match next {
                Some(Ok(bytes)) => {
                    self.pending
                        .extend(decoder.feed(&bytes).into_iter().map(StreamEvent::from));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.pending.extend(decoder.finish().map(StreamEvent::from));
                    self.finished = true;
                }
            }
        }
    }

    fn observe(&mut self, event: StreamEvent) -> StreamEvent {
        match &event {
            StreamEvent::Delta(delta) => {
                if let Some(content) = &delta.content {
                    self.text.push_str(content);
                }
            }
            StreamEvent::Done => {
                self.pending.clear();
                self.finished = true;
            }
            StreamEvent::Unparseable(_) => {}
        }
        event
    }
}
