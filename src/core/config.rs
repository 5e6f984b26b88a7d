//! Configuration management for the proxy server.
//!
//! Settings come from the environment (after `.env` has been loaded by the
//! binary). The per-model parameter table is loaded separately by
//! [`crate::services::ModelTable`], which uses [`expand_env_vars`] on its file.

use crate::relay::{ContinuationPolicy, ReasoningDisplay, DEFAULT_CONTINUATION_PROMPTS};
use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Separator between entries of `CONTINUATION_PROMPTS`.
const PROMPT_LIST_SEPARATOR: &str = "||";

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-?([^}]*))?\}")
        .expect("env var pattern is a valid regex")
});

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    pub server: ServerConfig,

    /// Upstream API endpoint and credentials
    pub upstream: UpstreamConfig,

    /// How the reasoning channel is shown to clients
    pub reasoning_display: ReasoningDisplay,

    /// Ask upstream models to enable their thinking template
    pub thinking_mode: bool,

    /// Optional model table file (YAML, TOML or JSON)
    pub model_config_path: Option<String>,

    /// Streaming behavior
    pub streaming: StreamingConfig,

    /// Continuation policy applied to every exchange
    pub continuation: ContinuationPolicy,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL, `/chat/completions` is appended
    pub api_base: String,

    /// Bearer token
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Whether to verify SSL certificates for upstream requests
    pub verify_ssl: bool,

    /// Wall-clock timeout for one upstream call
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: "https://integrate.api.nvidia.com/v1".to_string(),
            api_key: String::new(),
            verify_ssl: true,
            request_timeout_secs: 300,
        }
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Call upstream non-streaming and replay the result word by word
    pub simulate: bool,

    /// Delay between replayed words
    pub pacing_ms: u64,

    /// Frames buffered between the relay task and the HTTP body
    pub buffer_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            pacing_ms: 0,
            buffer_size: 32,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            reasoning_display: ReasoningDisplay::default(),
            thinking_mode: false,
            model_config_path: None,
            streaming: StreamingConfig::default(),
            continuation: ContinuationPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nim_proxy_rust::core::config::AppConfig;
    ///
    /// let config = AppConfig::from_env().expect("Failed to load config");
    /// println!("listening on {}:{}", config.server.host, config.server.port);
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = AppConfig::default();

        if let Some(host) = var("HOST") {
            config.server.host = host;
        }
        if let Some(port) = var("PORT") {
            config.server.port = parse_var("PORT", &port)?;
        }

        if let Some(base) = var("NIM_API_BASE") {
            config.upstream.api_base = base;
        }
        if let Some(key) = var("NIM_API_KEY") {
            config.upstream.api_key = key;
        }
        if let Some(verify) = var("VERIFY_SSL") {
            config.upstream.verify_ssl = str_to_bool(&verify);
        }
        if let Some(timeout) = var("REQUEST_TIMEOUT_SECS") {
            config.upstream.request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", &timeout)?;
        }

        config.reasoning_display = match (var("REASONING_DISPLAY"), var("SHOW_REASONING")) {
            (Some(display), _) => ReasoningDisplay::from_str(&display)
                .map_err(|e| anyhow!(e))
                .context("Invalid REASONING_DISPLAY")?,
            (None, Some(show)) if str_to_bool(&show) => ReasoningDisplay::Inlined,
            _ => ReasoningDisplay::default(),
        };
        if let Some(thinking) = var("ENABLE_THINKING_MODE") {
            config.thinking_mode = str_to_bool(&thinking);
        }
        config.model_config_path = var("MODEL_CONFIG_PATH");

        if let Some(simulate) = var("SIMULATE_STREAMING") {
            config.streaming.simulate = str_to_bool(&simulate);
        }
        if let Some(pacing) = var("STREAM_PACING_MS") {
            config.streaming.pacing_ms = parse_var("STREAM_PACING_MS", &pacing)?;
        }
        if let Some(size) = var("STREAM_BUFFER_SIZE") {
            config.streaming.buffer_size = parse_var::<usize>("STREAM_BUFFER_SIZE", &size)?.max(1);
        }

        let policy = &mut config.continuation;
        if let Some(enabled) = var("CONTINUATION_ENABLED") {
            policy.enabled = str_to_bool(&enabled);
        }
        if let Some(units) = var("CONTINUATION_MIN_UNITS") {
            policy.min_desired_units = parse_var("CONTINUATION_MIN_UNITS", &units)?;
        }
        if let Some(attempts) = var("CONTINUATION_MAX_ATTEMPTS") {
            policy.max_attempts = parse_var("CONTINUATION_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(chars) = var("CONTINUATION_MIN_VIABLE_CHARS") {
            policy.min_viable_chars = parse_var("CONTINUATION_MIN_VIABLE_CHARS", &chars)?;
        }
        // not filtered: an empty separator is a valid choice
        if let Some(separator) = lookup("CONTINUATION_SEPARATOR") {
            policy.separator = unescape(&separator);
        }
        if let Some(cap) = var("CONTINUATION_MAX_TOKENS") {
            policy.followup_max_tokens = Some(parse_var("CONTINUATION_MAX_TOKENS", &cap)?);
        }
        if let Some(reuse) = var("CONTINUATION_REUSE_SAMPLING") {
            policy.reuse_sampling = str_to_bool(&reuse);
        }
        if let Some(prompts) = var("CONTINUATION_PROMPTS") {
            policy.prompts = parse_prompt_list(&prompts);
        }

        Ok(config)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("Invalid value for {}: '{}'", key, value))
}

/// Split a `||`-separated prompt list, falling back to the built-in rotation
/// when nothing usable is left.
fn parse_prompt_list(raw: &str) -> Vec<String> {
    let prompts: Vec<String> = raw
        .split(PROMPT_LIST_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if prompts.is_empty() {
        DEFAULT_CONTINUATION_PROMPTS
            .iter()
            .map(|p| p.to_string())
            .collect()
    } else {
        prompts
    }
}

/// Turn `\n` and `\t` escapes from a single-line env value into characters.
fn unescape(value: &str) -> String {
    value.replace("\\n", "\n").replace("\\t", "\t")
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
pub fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
