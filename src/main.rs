//! NIM Proxy Server - Main entry point
//!
//! Builds the runtime, initializes logging and metrics, loads configuration
//! and the model table, then serves the router.

use anyhow::{Context, Result};
use chrono::Local;
use nim_proxy_rust::{
    build_router,
    core::{config::UpstreamConfig, init_metrics, AppConfig},
    AppState, ModelTable,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

    println!("Tokio runtime: using {} worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn init_tracing() {
    let no_color = std::env::var("NO_COLOR").is_ok();
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let base_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,nim_proxy_rust=debug".to_string());

    // Appended even when RUST_LOG is set, otherwise "trace" floods the log with hyper internals
    let filter_str = format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn",
        base_filter
    );
    let filter = tracing_subscriber::EnvFilter::new(filter_str);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_timer(LocalTime),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_ansi(!no_color),
            )
            .init();
    }
}

async fn async_main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = AppConfig::from_env()?;

    if config.upstream.api_key.is_empty() {
        tracing::warn!("NIM_API_KEY is not set; upstream calls will be rejected");
    }

    let models = match &config.model_config_path {
        Some(path) => {
            let table = ModelTable::load(path)?;
            tracing::info!(path = %path, models = table.models.len(), "Loaded model table");
            table
        }
        None => ModelTable::builtin(),
    };

    let http_client = create_http_client(&config.upstream)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    tracing::info!(
        upstream = %config.upstream.api_base,
        reasoning_display = %config.reasoning_display,
        thinking_mode = config.thinking_mode,
        simulate_streaming = config.streaming.simulate,
        continuation = config.continuation.enabled,
        min_units = config.continuation.min_desired_units,
        max_attempts = config.continuation.max_attempts,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config, models, http_client));
    let app = build_router(state);

    tracing::info!("Starting NIM proxy on {}", addr);
    tracing::info!("OpenAI API: /v1/chat/completions, /v1/models");
    tracing::info!("Swagger UI: /swagger-ui");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create HTTP client with connection pooling
fn create_http_client(config: &UpstreamConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")
}
