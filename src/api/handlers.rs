//! HTTP request handlers for the proxy API.
//!
//! Chat completions, model listing, health, metrics and the JSON 404
//! fallback. Handlers resolve the request into a [`RequestConfig`] and hand
//! it to the relay; they hold no relay logic themselves.

use crate::api::models::*;
use crate::api::streaming::stream_exchange;
use crate::core::config::AppConfig;
use crate::core::estimator::{estimate, estimate_messages};
use crate::core::logging::get_request_id;
use crate::core::metrics::PrometheusCollector;
use crate::core::{AppError, Result, StreamCancelHandle};
use crate::relay::sanitizer::merge_reasoning;
use crate::relay::{
    BufferSink, HttpUpstream, Orchestrator, RequestConfig, SimulatedUpstream, Upstream,
    REASONING_FIELDS,
};
use crate::services::{ModelTable, ResolveOptions};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;

/// Owner reported for every listed model.
const MODEL_OWNER: &str = "nvidia-nim-proxy";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub models: ModelTable,
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Wire the upstream client and orchestrator from configuration.
    pub fn new(config: AppConfig, models: ModelTable, http_client: reqwest::Client) -> Self {
        let http: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(
            http_client,
            config.upstream.api_base.clone(),
            config.upstream.api_key.clone(),
            Duration::from_secs(config.upstream.request_timeout_secs),
        ));
        let upstream: Arc<dyn Upstream> = if config.streaming.simulate {
            Arc::new(SimulatedUpstream::new(
                http,
                Duration::from_millis(config.streaming.pacing_ms),
            ))
        } else {
            http
        };

        let orchestrator = Orchestrator::new(
            upstream,
            config.continuation.clone(),
            Arc::new(PrometheusCollector),
        );

        Self {
            config,
            models,
            orchestrator,
        }
    }

    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            reasoning: self.config.reasoning_display,
            thinking: self.config.thinking_mode,
        }
    }
}

/// OpenAPI document for the public endpoints.
#[derive(OpenApi)]
#[openapi(
    paths(chat_completions, list_models, health),
    components(schemas(
        ChatCompletionRequest,
        ChatCompletionResponse,
        Message,
        Choice,
        Usage,
        ModelList,
        ModelInfo,
        ModelConfigSummary,
        HealthResponse,
        HealthFeatures,
        ApiErrorResponse,
        ApiErrorDetail,
    )),
    tags(
        (name = "completions", description = "OpenAI-compatible chat completions"),
        (name = "models", description = "Configured model listing"),
        (name = "health", description = "Service health")
    ),
    info(
        title = "NIM Proxy API",
        version = "0.1.0",
        description = "OpenAI-compatible relay in front of NVIDIA NIM chat models."
    )
)]
pub struct ApiDoc;

/// Handle chat completion requests.
///
/// Streams SSE frames when `stream` is true, otherwise returns a single
/// completion object.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "completions",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion (JSON) or SSE stream", body = ChatCompletionResponse),
        (status = 400, description = "Invalid request", body = ApiErrorResponse),
        (status = 502, description = "Upstream unreachable", body = ApiErrorResponse),
        (status = 504, description = "Upstream timed out", body = ApiErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, payload),
    fields(model = tracing::field::Empty, stream = tracing::field::Empty)
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(status = %rejection.status(), "Rejected request body");
        AppError::BadRequest(rejection.body_text())
    })?;
    let span = tracing::Span::current();
    span.record("model", request.model.as_str());
    span.record("stream", request.is_stream());

    let config = state.models.resolve(&request, &state.resolve_options())?;

    tracing::debug!(
        request_id = %get_request_id(),
        model = %config.display_model,
        upstream_model = %config.upstream_model,
        messages = config.messages.len(),
        "Processing chat completion request"
    );

    if request.is_stream() {
        return Ok(stream_exchange(
            state.orchestrator.clone(),
            config,
            state.config.streaming.buffer_size,
        )
        .await);
    }

    let response = if state.orchestrator.policy().enabled {
        complete_orchestrated(&state.orchestrator, &config).await?
    } else {
        complete_once(&state.orchestrator, &config).await?
    };
    Ok(Json(response).into_response())
}

/// One non-streaming upstream call, reshaped for the client.
async fn complete_once(
    orchestrator: &Orchestrator,
    config: &RequestConfig,
) -> Result<ChatCompletionResponse> {
    let completion = orchestrator.upstream().complete(&config.payload()).await?;

    let mut choices: Vec<Choice> = completion
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .enumerate()
                .map(|(position, choice)| rebuild_choice(position, choice, config))
                .collect()
        })
        .unwrap_or_default();
    if choices.is_empty() {
        choices.push(rebuild_choice(0, &Value::Null, config));
    }
    let usage = completion
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok())
        .unwrap_or_default();

    Ok(ChatCompletionResponse {
        choices,
        ..completion_response(&config.display_model, String::new(), "stop", usage)
    })
}

/// Rebuild one upstream choice with its reasoning merged per display policy.
fn rebuild_choice(position: usize, choice: &Value, config: &RequestConfig) -> Choice {
    let message = choice.get("message");
    let content = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let reasoning = message.and_then(|m| {
        REASONING_FIELDS
            .iter()
            .find_map(|field| m.get(*field).and_then(Value::as_str))
    });
    let index = choice
        .get("index")
        .and_then(Value::as_u64)
        .map(|i| i as u32)
        .unwrap_or(position as u32);
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop");

    Choice {
        index,
        message: Message::new(
            "assistant",
            merge_reasoning(content, reasoning, config.reasoning),
        ),
        finish_reason: Some(finish_reason.to_string()),
    }
}

/// Run the continuation loop into a buffer and return everything it produced.
async fn complete_orchestrated(
    orchestrator: &Orchestrator,
    config: &RequestConfig,
) -> Result<ChatCompletionResponse> {
    let mut sink = BufferSink::new();
    // dropped together with the handler future on disconnect
    let cancel = StreamCancelHandle::new();
    let outcome = orchestrator.run(config, &mut sink, &cancel).await?;

    let usage = Usage::new(
        estimate_messages(&config.messages) as u32,
        estimate(sink.content()) as u32,
    );
    let finish_reason = outcome.finish_reason.as_deref().unwrap_or("stop");

    Ok(completion_response(
        &config.display_model,
        sink.content().to_string(),
        finish_reason,
        usage,
    ))
}

fn completion_response(
    model: &str,
    content: String,
    finish_reason: &str,
    usage: Usage,
) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::new("assistant", content),
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage,
    }
}

/// List configured models with their default parameters.
#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses((status = 200, description = "Configured models", body = ModelList))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let created = chrono::Utc::now().timestamp();
    let data = state
        .models
        .models
        .iter()
        .map(|(id, entry)| ModelInfo {
            id: id.clone(),
            object: "model".to_string(),
            created,
            owned_by: MODEL_OWNER.to_string(),
            config: ModelConfigSummary {
                temperature: state.models.effective_sampling(entry).temperature,
                max_tokens: entry.max_tokens,
                has_system_prompt: entry.has_system_prompt(),
            },
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

/// Basic health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        features: HealthFeatures {
            reasoning_display: state.config.reasoning_display.to_string(),
            thinking_mode: state.config.thinking_mode,
            continuation: state.config.continuation.enabled,
            simulated_streaming: state.config.streaming.simulate,
            custom_configs: state.models.models.len(),
            presets: state
                .models
                .preset_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        },
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

/// JSON 404 for unknown routes.
pub async fn not_found(uri: Uri) -> AppError {
    tracing::debug!(path = %uri.path(), "No route matched");
    AppError::NotFound(uri.path().to_string())
}
