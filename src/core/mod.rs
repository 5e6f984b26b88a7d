//! Core functionality for the proxy server.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Request context and logging helpers
//! - Metrics collection
//! - HTTP middleware
//! - Output length estimation

pub mod cancel;
pub mod config;
pub mod error;
pub mod error_types;
pub mod estimator;
pub mod logging;
pub mod metrics;
pub mod middleware;

// Re-export commonly used types
pub use cancel::{CancelOnDrop, StreamCancelHandle};
pub use config::{AppConfig, ServerConfig, StreamingConfig, UpstreamConfig};
pub use error::{AppError, Result};
pub use logging::{generate_request_id, get_request_id, REQUEST_ID};
pub use metrics::{
    get_metrics, init_metrics, Metrics, MetricsCollector, NoopCollector, PrometheusCollector,
};
pub use middleware::{request_id_middleware, MetricsMiddleware};
