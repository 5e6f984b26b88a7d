//! Continuation orchestrator.
//!
//! Drives one exchange through its phases:
//!
//! ```text
//! Initial -> decide -> Continuing(1) -> decide -> ... -> Done
//! ```
//!
//! Every phase is one upstream streaming call whose deltas are sanitized and
//! written to the sink as they arrive. After each phase the accumulated
//! content is measured with the length estimator; if it is still short and
//! attempts remain, a follow-up call is made with the text so far as an
//! assistant turn plus a continuation prompt. The client sees one stream.
//!
//! A transport failure in the initial phase is the exchange's failure. In a
//! continuation phase it ends the loop and keeps what was already produced.
//! Cancellation (client gone) abandons the in-flight upstream call at once.

use super::continuation::{ContinuationPolicy, Phase, StopReason};
use super::error::RelayError;
use super::event::{ChunkTemplate, StreamEvent};
use super::request::{RequestConfig, UpstreamPayload};
use super::sanitizer::{sanitize, ReasoningState};
use super::sink::{RelaySink, SinkEvent};
use super::upstream::Upstream;
use crate::core::cancel::StreamCancelHandle;
use crate::core::estimator::estimate;
use crate::core::metrics::MetricsCollector;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Finish reason reported when upstream never sent one.
const DEFAULT_FINISH_REASON: &str = "stop";

/// Summary of a completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    /// Upstream calls issued, initial included.
    pub upstream_calls: u32,
    /// Follow-up calls issued.
    pub attempts: u32,
    /// Accumulated content: the initial text, then separator + text of every
    /// viable follow-up.
    pub content: String,
    /// `estimate(content)`.
    pub units: usize,
    pub stop: StopReason,
    /// Last finish reason upstream reported.
    pub finish_reason: Option<String>,
}

/// State shared by all phases of one exchange.
struct ExchangeState {
    template: ChunkTemplate,
    reasoning: ReasoningState,
    finish_reason: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    upstream: Arc<dyn Upstream>,
    policy: ContinuationPolicy,
    metrics: Arc<dyn MetricsCollector>,
}

impl Orchestrator {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        policy: ContinuationPolicy,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            upstream,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &ContinuationPolicy {
        &self.policy
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    /// Run one exchange to completion, writing everything to `sink`.
    ///
    /// On success the sink has been closed (terminal sentinel written). On
    /// error it has not: the caller decides how to report the failure.
    pub async fn run(
        &self,
        config: &RequestConfig,
        sink: &mut dyn RelaySink,
        cancel: &StreamCancelHandle,
    ) -> Result<ExchangeOutcome, RelayError> {
        let mut exchange = ExchangeState {
            template: ChunkTemplate::new(&config.display_model),
            reasoning: ReasoningState::new(),
            finish_reason: None,
        };

        let mut accumulated = self
            .run_phase(Phase::Initial, &config.payload(), config, &mut exchange, sink, cancel)
            .await?;
        let mut upstream_calls = 1;
        let mut attempts = 0;

        let stop = loop {
            let units = estimate(&accumulated);
            if let Some(stop) = self.policy.decide(units, attempts) {
                break stop;
            }

            attempts += 1;
            let phase = Phase::Continuing(attempts);
            tracing::debug!(
                model = %config.display_model,
                attempt = attempts,
                units,
                target = self.policy.min_desired_units,
                "Response below target length, continuing"
            );

            sink.write(SinkEvent::Chunk(
                exchange.template.content_chunk(&self.policy.separator),
            ))
            .await?;

            let payload = config.followup_payload(&accumulated, attempts, &self.policy);
            upstream_calls += 1;

            match self
                .run_phase(phase, &payload, config, &mut exchange, sink, cancel)
                .await
            {
                Ok(text) => {
                    if !self.policy.is_viable(&text) {
                        tracing::debug!(
                            attempt = attempts,
                            chars = text.chars().count(),
                            min_viable_chars = self.policy.min_viable_chars,
                            "Follow-up too short, stopping"
                        );
                        break StopReason::Degenerate;
                    }
                    accumulated.push_str(&self.policy.separator);
                    accumulated.push_str(&text);
                }
                Err(RelayError::Transport(e)) => {
                    tracing::warn!(
                        attempt = attempts,
                        status = e.http_status(),
                        error = %e,
                        "Continuation failed, keeping prior output"
                    );
                    break StopReason::ContinuationFailed;
                }
                Err(e) => return Err(e),
            }
        };

        if self.policy.enabled {
            let reason = exchange
                .finish_reason
                .as_deref()
                .unwrap_or(DEFAULT_FINISH_REASON);
            sink.write(SinkEvent::Chunk(exchange.template.finish_chunk(reason)))
                .await?;
        }
        sink.close().await?;

        let units = estimate(&accumulated);
        self.metrics
            .exchange_finished(&config.upstream_model, attempts, units, stop.as_str());
        tracing::info!(
            model = %config.display_model,
            upstream_calls,
            attempts,
            units,
            stop = %stop,
            "Exchange finished"
        );

        Ok(ExchangeOutcome {
            upstream_calls,
            attempts,
            content: accumulated,
            units,
            stop,
            finish_reason: exchange.finish_reason,
        })
    }

    /// Run one upstream call, racing it against cancellation. Returns the
    /// content the call produced.
    async fn run_phase(
        &self,
        phase: Phase,
        payload: &UpstreamPayload,
        config: &RequestConfig,
        exchange: &mut ExchangeState,
        sink: &mut dyn RelaySink,
        cancel: &StreamCancelHandle,
    ) -> Result<String, RelayError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(phase = %phase, "Client disconnected, abandoning upstream call");
                Err(RelayError::ClientDisconnected)
            }
            result = self.relay_phase(phase, payload, config, exchange, sink) => result,
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(RelayError::Transport(_)) => "error",
            Err(RelayError::ClientDisconnected) => "aborted",
        };
        self.metrics
            .upstream_call(&config.upstream_model, phase.label(), outcome);

        result
    }

    async fn relay_phase(
        &self,
        phase: Phase,
        payload: &UpstreamPayload,
        config: &RequestConfig,
        exchange: &mut ExchangeState,
        sink: &mut dyn RelaySink,
    ) -> Result<String, RelayError> {
        let started = Instant::now();
        let mut stream = self.upstream.stream_call(payload).await?;
        let mut first_delta = true;

        while let Some(event) = stream.next_event().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    // keep inlined wrappers balanced for whatever reports the failure
                    Self::close_reasoning(exchange, sink).await?;
                    return Err(e.into());
                }
            };
            match event {
                StreamEvent::Delta(delta) => {
                    if first_delta && (delta.content.is_some() || delta.reasoning.is_some()) {
                        first_delta = false;
                        self.metrics.first_delta(
                            &config.upstream_model,
                            phase.label(),
                            started.elapsed(),
                        );
                    }
                    if let Some(reason) = delta.finish_reason() {
                        exchange.finish_reason = Some(reason.to_string());
                    }

                    let mut chunk = sanitize(&delta, config.reasoning, &mut exchange.reasoning);
                    exchange.template.rewrite_model(&mut chunk);
                    if self.policy.enabled {
                        // held back until the final chunk of the exchange
                        if let Some(reason) = chunk.pointer_mut("/choices/0/finish_reason") {
                            *reason = Value::Null;
                        }
                    }
                    sink.write(SinkEvent::Chunk(chunk)).await?;
                }
                StreamEvent::Unparseable(line) => {
                    sink.write(SinkEvent::Raw(line)).await?;
                }
                StreamEvent::Done => break,
            }
        }

        Self::close_reasoning(exchange, sink).await?;

        tracing::debug!(
            phase = %phase,
            attempt = phase.attempt(),
            chars = stream.text().chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upstream phase complete"
        );

        Ok(stream.text().to_string())
    }

    /// Write the closing wrapper if an inlined reasoning block is still open.
    async fn close_reasoning(
        exchange: &mut ExchangeState,
        sink: &mut dyn RelaySink,
    ) -> Result<(), RelayError> {
        if let Some(close) = exchange.reasoning.close() {
            sink.write(SinkEvent::Chunk(exchange.template.content_chunk(close)))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Message;
    use crate::core::metrics::NoopCollector;
    use crate::relay::error::StreamTransportError;
    use crate::relay::sanitizer::ReasoningDisplay;
    use crate::relay::sink::BufferSink;
    use crate::relay::upstream::UpstreamStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;

    /// Replies to successive calls with scripted SSE bodies.
    struct Scripted {
        replies: Mutex<Vec<Result<String, StreamTransportError>>>,
        calls: Mutex<Vec<UpstreamPayload>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, StreamTransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Upstream for Scripted {
        async fn stream_call(
            &self,
            payload: &UpstreamPayload,
        ) -> Result<UpstreamStream, StreamTransportError> {
            self.calls.lock().unwrap().push(payload.clone());
            let body = self.replies.lock().unwrap().pop().expect("unexpected call")?;
            Ok(UpstreamStream::from_body(stream::iter(vec![Ok(Bytes::from(body))])))
        }

        async fn complete(&self, _: &UpstreamPayload) -> Result<Value, StreamTransportError> {
            unreachable!()
        }
    }

    fn sse(text: &str) -> String {
        format!(
            "data: {}\n\ndata: [DONE]\n\n",
            serde_json::json!({"model": "up", "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
        )
    }

    fn config() -> RequestConfig {
        RequestConfig {
            upstream_model: "up".into(),
            display_model: "client-model".into(),
            messages: vec![Message::new("user", "hi")],
            sampling: Default::default(),
            max_tokens: Some(100),
            reasoning: ReasoningDisplay::Suppressed,
            thinking: false,
        }
    }

    fn orchestrator(upstream: Arc<Scripted>, policy: ContinuationPolicy) -> Orchestrator {
        Orchestrator::new(upstream, policy, Arc::new(NoopCollector))
    }

    #[tokio::test]
    async fn test_disabled_makes_single_call() {
        let upstream = Scripted::new(vec![Ok(sse("short"))]);
        let orch = orchestrator(upstream.clone(), ContinuationPolicy::disabled());
        let mut sink = BufferSink::new();

        let outcome = orch
            .run(&config(), &mut sink, &StreamCancelHandle::new())
            .await
            .unwrap();

        assert_eq!(outcome.upstream_calls, 1);
        assert_eq!(outcome.stop, StopReason::Disabled);
        assert_eq!(sink.content(), "short");
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_relayed_chunks_carry_client_model() {
        let upstream = Scripted::new(vec![Ok(sse("x"))]);
        let orch = orchestrator(upstream, ContinuationPolicy::disabled());
        let mut sink = BufferSink::new();
        orch.run(&config(), &mut sink, &StreamCancelHandle::new())
            .await
            .unwrap();

        match &sink.events()[0] {
            SinkEvent::Chunk(chunk) => assert_eq!(chunk["model"], "client-model"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_degenerate_followup_not_appended() {
        let upstream = Scripted::new(vec![Ok(sse("initial text")), Ok(sse("tiny"))]);
        let policy = ContinuationPolicy {
            enabled: true,
            min_desired_units: 1000,
            max_attempts: 5,
            min_viable_chars: 10,
            ..Default::default()
        };
        let orch = orchestrator(upstream, policy);
        let mut sink = BufferSink::new();

        let outcome = orch
            .run(&config(), &mut sink, &StreamCancelHandle::new())
            .await
            .unwrap();

        assert_eq!(outcome.upstream_calls, 2);
        assert_eq!(outcome.stop, StopReason::Degenerate);
        assert_eq!(outcome.content, "initial text");
        // the client already saw the separator and the short follow-up
        assert_eq!(sink.content(), "initial text\n\ntiny");
        assert_eq!(sink.finish_reason(), Some("stop"));
    }

    #[tokio::test]
    async fn test_initial_failure_propagates_without_close() {
        let upstream = Scripted::new(vec![Err(StreamTransportError::status(503, "busy"))]);
        let orch = orchestrator(upstream, ContinuationPolicy::disabled());
        let mut sink = BufferSink::new();

        let err = orch
            .run(&config(), &mut sink, &StreamCancelHandle::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Transport(ref e) if e.http_status() == 503));
        assert!(!sink.is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_exchange_aborts() {
        let upstream = Scripted::new(vec![Ok(sse("x"))]);
        let orch = orchestrator(upstream, ContinuationPolicy::disabled());
        let cancel = StreamCancelHandle::new();
        cancel.cancel();

        let err = orch
            .run(&config(), &mut BufferSink::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ClientDisconnected));
    }
}
