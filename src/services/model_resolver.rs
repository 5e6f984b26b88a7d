//! Model resolution.
//!
//! Maps the model id a client asks for onto an upstream model plus default
//! parameters, producing the fully populated [`RequestConfig`] the relay
//! runs with. Unknown ids go through substring fallback rules, so
//! resolution never fails for a well-formed request.

use crate::api::models::{ChatCompletionRequest, Message};
use crate::core::config::expand_env_vars;
use crate::core::error::AppError;
use crate::relay::{ReasoningDisplay, RequestConfig, SamplingParams};
use anyhow::{bail, Context};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

/// Parameters for one client-facing model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub upstream_model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Named preset supplying sampling parameters not set explicitly.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelEntry {
    fn explicit_sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }

    pub fn has_system_prompt(&self) -> bool {
        self.system_prompt
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Routes ids containing any of `contains` (case-insensitive) to `upstream_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub contains: Vec<String>,
    pub upstream_model: String,
}

/// How unknown model ids are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Checked in order; the first match wins.
    #[serde(default)]
    pub rules: Vec<FallbackRule>,
    pub default_model: String,
    /// Parameters applied to every fallback resolution.
    #[serde(default)]
    pub defaults: ModelEntry,
}

impl FallbackConfig {
    fn entry_for(&self, model: &str) -> ModelEntry {
        let lower = model.to_lowercase();
        let upstream_model = self
            .rules
            .iter()
            .find(|rule| {
                rule.contains
                    .iter()
                    .any(|needle| lower.contains(&needle.to_lowercase()))
            })
            .map(|rule| rule.upstream_model.clone())
            .unwrap_or_else(|| self.default_model.clone());

        ModelEntry {
            upstream_model,
            ..self.defaults.clone()
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                FallbackRule {
                    contains: vec!["gpt-4".into(), "405b".into()],
                    upstream_model: "meta/llama-3.1-405b-instruct".into(),
                },
                FallbackRule {
                    contains: vec!["claude".into(), "70b".into()],
                    upstream_model: "meta/llama-3.1-70b-instruct".into(),
                },
            ],
            default_model: "meta/llama-3.1-8b-instruct".into(),
            defaults: ModelEntry {
                system_prompt: Some(
                    "You are a thorough assistant. Write long, detailed answers.".into(),
                ),
                temperature: Some(0.75),
                top_p: Some(0.9),
                frequency_penalty: Some(0.2),
                presence_penalty: Some(0.2),
                max_tokens: Some(5000),
                ..Default::default()
            },
        }
    }
}

/// Options applied to every resolution, from the server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub reasoning: ReasoningDisplay,
    pub thinking: bool,
}

/// The per-model parameter table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTable {
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
    #[serde(default = "builtin_presets")]
    pub presets: BTreeMap<String, SamplingParams>,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn sampling(temperature: f32, top_p: f32, frequency: f32, presence: f32) -> SamplingParams {
    SamplingParams {
        temperature: Some(temperature),
        top_p: Some(top_p),
        frequency_penalty: Some(frequency),
        presence_penalty: Some(presence),
    }
}

fn builtin_presets() -> BTreeMap<String, SamplingParams> {
    BTreeMap::from([
        ("creative".to_string(), sampling(0.9, 0.95, 0.3, 0.5)),
        ("precise".to_string(), sampling(0.2, 0.8, 0.0, 0.0)),
        ("balanced".to_string(), sampling(0.7, 0.9, 0.1, 0.1)),
        ("roleplay".to_string(), sampling(0.85, 0.92, 0.4, 0.6)),
    ])
}

fn tuned(upstream: &str, prompt: &str, max_tokens: u32, params: SamplingParams) -> ModelEntry {
    ModelEntry {
        upstream_model: upstream.to_string(),
        system_prompt: (!prompt.is_empty()).then(|| prompt.to_string()),
        preset: None,
        temperature: params.temperature,
        top_p: params.top_p,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        max_tokens: Some(max_tokens),
    }
}

fn preset(upstream: &str, prompt: &str, max_tokens: u32, preset: &str) -> ModelEntry {
    ModelEntry {
        upstream_model: upstream.to_string(),
        system_prompt: Some(prompt.to_string()),
        preset: Some(preset.to_string()),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

impl ModelTable {
    /// The table compiled into the binary.
    pub fn builtin() -> Self {
        let models = BTreeMap::from([
            (
                "gpt-4o".to_string(),
                tuned("deepseek-ai/deepseek-r1-0528", "", 8000, sampling(0.7, 0.9, 0.0, 0.0)),
            ),
            (
                "gpt-4".to_string(),
                tuned(
                    "deepseek-ai/deepseek-r1-distill-llama-70b",
                    "You are a professional expert. Give precise, well-structured answers.",
                    4000,
                    sampling(0.5, 0.85, 0.2, 0.0),
                ),
            ),
            (
                "gpt-3.5-turbo".to_string(),
                preset(
                    "deepseek-ai/deepseek-v3.2",
                    "You are a thorough, immersive role-play partner. Write long, detailed \
                     replies of at least 300-400 words. Describe scenes, emotions, thoughts \
                     and actions precisely, using vivid language. Every reply should span \
                     several paragraphs. Stay in character and build an immersive atmosphere.",
                    16000,
                    "roleplay",
                ),
            ),
            (
                "deepseek-r1-creative".to_string(),
                preset(
                    "deepseek-ai/deepseek-r1-distill-llama-70b",
                    "You are a creative storyteller. Be imaginative, detailed and entertaining.",
                    6000,
                    "creative",
                ),
            ),
            (
                "deepseek-r1-coder".to_string(),
                preset(
                    "qwen/qwen3-coder-480b-a35b-instruct",
                    "You are a programming expert. Write clean, well-documented code and explain it.",
                    8000,
                    "precise",
                ),
            ),
            (
                "deepseek-r1-roleplay".to_string(),
                preset(
                    "deepseek-ai/deepseek-r1-distill-llama-70b",
                    "You are an empathetic role-play character. Stay in character and answer immersively.",
                    5000,
                    "roleplay",
                ),
            ),
            (
                "claude-3-opus".to_string(),
                tuned(
                    "openai/gpt-oss-120b",
                    "You are a highly intelligent assistant with excellent judgement.",
                    6000,
                    sampling(0.7, 0.9, 0.0, 0.0),
                ),
            ),
            (
                "gemini-pro".to_string(),
                tuned(
                    "qwen/qwen3-next-80b-a3b-thinking",
                    "You are a versatile assistant with strong analytical skills.",
                    4000,
                    sampling(0.65, 0.88, 0.1, 0.1),
                ),
            ),
        ]);

        Self {
            models,
            presets: builtin_presets(),
            fallback: FallbackConfig::default(),
        }
    }

    /// Load a table from a YAML, TOML or JSON file (by extension, YAML
    /// otherwise). `${VAR}` references are expanded before parsing.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config file: {}", path))?;
        let expanded = expand_env_vars(&content);

        let format = match Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        };

        let table: ModelTable = Config::builder()
            .add_source(File::from_str(&expanded, format))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to parse model config file: {}", path))?;

        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (id, entry) in &self.models {
            if entry.upstream_model.trim().is_empty() {
                bail!("Model '{}' has no upstream_model", id);
            }
            if let Some(preset) = &entry.preset {
                if !self.presets.contains_key(preset) {
                    bail!("Model '{}' references unknown preset '{}'", id, preset);
                }
            }
        }
        if self.fallback.default_model.trim().is_empty() {
            bail!("fallback.default_model must not be empty");
        }
        Ok(())
    }

    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    /// Entry for `model`: exact id, then case-insensitive id, then fallback
    /// rules. The flag tells whether the id is configured.
    pub fn lookup(&self, model: &str) -> (Cow<'_, ModelEntry>, bool) {
        if let Some(entry) = self.models.get(model) {
            return (Cow::Borrowed(entry), true);
        }
        if let Some((_, entry)) = self
            .models
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(model))
        {
            return (Cow::Borrowed(entry), true);
        }
        (Cow::Owned(self.fallback.entry_for(model)), false)
    }

    /// Sampling parameters of an entry with its preset applied underneath.
    pub fn effective_sampling(&self, entry: &ModelEntry) -> SamplingParams {
        let explicit = entry.explicit_sampling();
        match entry.preset.as_deref() {
            Some(name) => match self.presets.get(name) {
                Some(preset) => explicit.or(preset),
                None => {
                    tracing::warn!(preset = %name, "Unknown preset, using explicit parameters only");
                    explicit
                }
            },
            None => explicit,
        }
    }

    /// Build the relay configuration for a client request. Request values
    /// win over the table.
    pub fn resolve(
        &self,
        request: &ChatCompletionRequest,
        options: &ResolveOptions,
    ) -> Result<RequestConfig, AppError> {
        let model = request.model.trim();
        if model.is_empty() {
            return Err(AppError::BadRequest("model is required".to_string()));
        }
        if request.messages.is_empty() {
            return Err(AppError::BadRequest(
                "messages must not be empty".to_string(),
            ));
        }

        let (entry, configured) = self.lookup(model);
        let sampling = request.sampling().or(&self.effective_sampling(&entry));

        let mut messages = request.messages.clone();
        if entry.has_system_prompt() && !messages.iter().any(|m| m.role == "system") {
            if let Some(prompt) = entry.system_prompt.as_deref() {
                messages.insert(0, Message::new("system", prompt));
            }
        }

        tracing::debug!(
            model = %model,
            upstream_model = %entry.upstream_model,
            configured,
            "Resolved model"
        );

        Ok(RequestConfig {
            upstream_model: entry.upstream_model.clone(),
            display_model: model.to_string(),
            messages,
            sampling,
            max_tokens: request.max_tokens.or(entry.max_tokens),
            reasoning: options.reasoning,
            thinking: options.thinking,
        })
    }
}
