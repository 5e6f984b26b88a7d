//! API layer for the proxy server.
//!
//! This module contains all HTTP handlers, request/response models,
//! SSE streaming glue and router assembly.

pub mod disconnect;
pub mod handlers;
pub mod models;
pub mod streaming;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// Re-export commonly used types
pub use handlers::{
    chat_completions, health, list_models, metrics_handler, not_found, ApiDoc, AppState,
};
pub use models::{
    ChatCompletionRequest, ChatCompletionResponse, HealthResponse, Message, ModelList, Usage,
};
pub use streaming::stream_exchange;

/// Build the router with all endpoints and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let swagger_ui = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi());

    let api_routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .layer(middleware::from_fn(
            crate::core::MetricsMiddleware::track_metrics,
        ))
        .with_state(state);

    Router::new()
        .merge(swagger_ui)
        .merge(api_routes)
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
        .layer(middleware::from_fn(crate::core::request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
