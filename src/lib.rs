//! NIM Proxy - an OpenAI-compatible streaming relay for NVIDIA NIM models
//!
//! Clients speak the OpenAI chat-completions protocol; requests are resolved
//! against a per-model parameter table and relayed to the upstream API with:
//!
//! - **Streaming Relay**: upstream SSE deltas are forwarded as they arrive
//! - **Reasoning Handling**: the `reasoning_content` channel is suppressed or
//!   inlined between `<think>` markers
//! - **Continuation**: responses judged too short are extended by follow-up
//!   calls, spliced into one client-visible stream
//! - **Metrics & Monitoring**: Prometheus metrics for observability
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging context, metrics, middleware, length estimation
//! - [`relay`]: frame codec, upstream stream client, sanitizer, orchestrator, sinks
//! - [`services`]: model resolution
//! - [`api`]: HTTP handlers, models and SSE glue
//!
//! # Configuration
//!
//! Everything is read from the environment (a `.env` file is honored):
//! - `NIM_API_KEY`: upstream bearer token
//! - `NIM_API_BASE`: upstream base URL (default: https://integrate.api.nvidia.com/v1)
//! - `PORT`: server port (default: 3000)
//! - `REASONING_DISPLAY`: `suppressed`, `inlined` or `hidden`
//! - `CONTINUATION_ENABLED`: extend short responses (default: false)
//! - `MODEL_CONFIG_PATH`: optional YAML/TOML/JSON model table

pub mod api;
pub mod core;
pub mod relay;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState, ChatCompletionRequest, ChatCompletionResponse};
pub use core::{AppConfig, AppError, Result};
pub use services::ModelTable;
