//! Server-Sent Events (SSE) streaming for chat completions.
//!
//! The orchestrator runs in its own task and writes SSE frames into a bounded
//! channel; the response body drains that channel. Headers are only sent once
//! the first frame exists, so an upstream failure before any output still
//! becomes a regular JSON error response. Failures after that point are
//! reported in-band followed by `[DONE]`.

use crate::api::disconnect::DisconnectStream;
use crate::core::error::AppError;
use crate::core::logging::get_request_id;
use crate::core::StreamCancelHandle;
use crate::relay::{
    ChannelSink, Orchestrator, RelayError, RelaySink, RequestConfig, SinkEvent,
    StreamTransportError,
};
use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use tokio::sync::mpsc;

type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

/// Run one exchange and stream its output to the client.
pub async fn stream_exchange(
    orchestrator: Orchestrator,
    config: RequestConfig,
    buffer_size: usize,
) -> Response {
    let (tx, mut rx) = mpsc::channel::<Bytes>(buffer_size.max(1));
    let cancel_handle = StreamCancelHandle::new();
    let task_cancel = cancel_handle.clone();
    let request_id = get_request_id();

    let relay = tokio::spawn(async move {
        crate::with_request_context!(request_id, async move {
            let mut sink = ChannelSink::new(tx);
            relay_to_channel(&orchestrator, &config, &mut sink, &task_cancel).await
        })
    });

    // dropping this future before the first frame means the client left
    let waiting = cancel_handle.drop_guard();
    let first = rx.recv().await;
    waiting.disarm();

    let first = match first {
        Some(frame) => frame,
        None => {
            // channel closed without output: the exchange failed up front
            return match relay.await {
                Ok(Err(e)) => AppError::Upstream(e).into_response(),
                Ok(Ok(())) => AppError::Internal("Stream ended without output".to_string())
                    .into_response(),
                Err(e) => {
                    tracing::error!(error = %e, "Relay task failed");
                    AppError::Internal("Relay task failed".to_string()).into_response()
                }
            };
        }
    };

    let frames: FrameStream = Box::pin(async_stream::stream! {
        yield Ok(first);
        while let Some(frame) = rx.recv().await {
            yield Ok(frame);
        }
    });

    let body = Body::from_stream(DisconnectStream {
        stream: frames,
        cancel_handle,
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

/// Drive the orchestrator into `sink`.
///
/// Returns the transport error only when nothing reached the client yet; the
/// caller turns it into an HTTP error response.
async fn relay_to_channel(
    orchestrator: &Orchestrator,
    config: &RequestConfig,
    sink: &mut ChannelSink,
    cancel: &StreamCancelHandle,
) -> Result<(), StreamTransportError> {
    match orchestrator.run(config, sink, cancel).await {
        Ok(outcome) => {
            cancel.mark_completed();
            tracing::debug!(
                request_id = %get_request_id(),
                frames = sink.frames_written(),
                stop = %outcome.stop,
                "Stream completed"
            );
            Ok(())
        }
        Err(RelayError::Transport(e)) if sink.frames_written() > 0 => {
            tracing::warn!(
                request_id = %get_request_id(),
                status = e.http_status(),
                error = %e,
                "Upstream failed mid-stream, reporting in-band"
            );
            if sink.write(SinkEvent::Error(e.to_stream_error_body())).await.is_ok() {
                let _ = sink.close().await;
            }
            cancel.mark_completed();
            Ok(())
        }
        Err(RelayError::Transport(e)) => Err(e),
        Err(RelayError::ClientDisconnected) => {
            tracing::info!(
                request_id = %get_request_id(),
                frames = sink.frames_written(),
                "Client disconnected, stream abandoned"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Message;
    use crate::core::metrics::NoopCollector;
    use crate::relay::{
        ContinuationPolicy, ReasoningDisplay, SamplingParams, Upstream, UpstreamPayload,
        UpstreamStream,
    };
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::Value;
    use std::sync::Arc;

    struct Fixed {
        body: Vec<Result<Bytes, StreamTransportError>>,
        status: Option<StreamTransportError>,
    }

    #[async_trait]
    impl Upstream for Fixed {
        async fn stream_call(
            &self,
            _payload: &UpstreamPayload,
        ) -> Result<UpstreamStream, StreamTransportError> {
            if let Some(e) = &self.status {
                return Err(e.clone());
            }
            Ok(UpstreamStream::from_body(stream::iter(self.body.clone())))
        }

        async fn complete(&self, _payload: &UpstreamPayload) -> Result<Value, StreamTransportError> {
            Err(StreamTransportError::status(500, "unused"))
        }
    }

    fn config() -> RequestConfig {
        RequestConfig {
            upstream_model: "up".to_string(),
            display_model: "x".to_string(),
            messages: vec![Message::new("user", "hi")],
            sampling: SamplingParams::default(),
            max_tokens: None,
            reasoning: ReasoningDisplay::Suppressed,
            thinking: false,
        }
    }

    fn orchestrator(upstream: Fixed) -> Orchestrator {
        Orchestrator::new(
            Arc::new(upstream),
            ContinuationPolicy::disabled(),
            Arc::new(NoopCollector),
        )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_headers_and_body() {
        let upstream = Fixed {
            body: vec![Ok(Bytes::from(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
            ))],
            status: None,
        };
        let response = stream_exchange(orchestrator(upstream), config(), 4).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let body = body_text(response).await;
        assert!(body.contains("\"content\":\"Hi\""));
        assert!(body.contains("\"model\":\"x\""));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_upfront_failure_is_json_error() {
        let upstream = Fixed {
            body: vec![],
            status: Some(StreamTransportError::status(401, "bad key")),
        };
        let response = stream_exchange(orchestrator(upstream), config(), 4).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["message"], "bad key");
    }

    #[tokio::test]
    async fn test_midstream_failure_reported_in_band() {
        let upstream = Fixed {
            body: vec![
                Ok(Bytes::from(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
                )),
                Err(StreamTransportError::body("Upstream stream interrupted")),
            ],
            status: None,
        };
        let response = stream_exchange(orchestrator(upstream), config(), 4).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        assert!(body.contains("partial"));
        assert!(body.contains("Upstream stream interrupted"));
        assert!(body.contains("\"type\":\"stream_error\""));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }
}
