//! Streaming relay with continuation orchestration.
//!
//! Leaf to root: [`frame`] decodes the line-oriented SSE protocol,
//! [`upstream`] turns one upstream call into a pull-based event stream,
//! [`sanitizer`] reshapes the reasoning channel, [`orchestrator`] runs the
//! continuation loop and [`sink`] delivers the result downstream.

pub mod continuation;
pub mod error;
pub mod event;
pub mod frame;
pub mod orchestrator;
pub mod request;
pub mod sanitizer;
pub mod sink;
pub mod upstream;

pub use continuation::{ContinuationPolicy, Phase, StopReason, DEFAULT_CONTINUATION_PROMPTS};
pub use error::{RelayError, SinkClosed, StreamTransportError, TransportErrorKind};
pub use event::{ChunkTemplate, DeltaEvent, StreamEvent, REASONING_FIELDS};
pub use frame::{Frame, FrameDecoder};
pub use orchestrator::{ExchangeOutcome, Orchestrator};
pub use request::{RequestConfig, SamplingParams, UpstreamPayload};
pub use sanitizer::{ReasoningDisplay, ReasoningState};
pub use sink::{BufferSink, ChannelSink, RelaySink, SinkEvent};
pub use upstream::{HttpUpstream, SimulatedUpstream, Upstream, UpstreamStream};
