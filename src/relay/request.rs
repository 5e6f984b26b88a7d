//! Resolved per-exchange request configuration and upstream payloads.

use super::continuation::ContinuationPolicy;
use super::sanitizer::ReasoningDisplay;
use crate::api::models::Message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sampling parameters forwarded to upstream. Unset fields are omitted so
/// upstream defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl SamplingParams {
    /// Fill unset fields from `defaults`.
    pub fn or(self, defaults: &SamplingParams) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
        }
    }
}

/// Everything the relay needs for one exchange, fully resolved.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Model id sent upstream.
    pub upstream_model: String,
    /// Model id the client asked for; written into every relayed chunk.
    pub display_model: String,
    pub messages: Vec<Message>,
    pub sampling: SamplingParams,
    /// Token budget for a single upstream call.
    pub max_tokens: Option<u32>,
    pub reasoning: ReasoningDisplay,
    /// Ask upstream to enable its thinking template.
    pub thinking: bool,
}

impl RequestConfig {
    /// Payload of the initial call.
    pub fn payload(&self) -> UpstreamPayload {
        UpstreamPayload {
            model: self.upstream_model.clone(),
            messages: self.messages.clone(),
            sampling: self.sampling.clone(),
            max_tokens: self.max_tokens,
            chat_template_kwargs: self.template_kwargs(),
        }
    }

    /// Payload of follow-up number `attempt`: the original messages, the text
    /// produced so far as an assistant turn, then the continuation prompt.
    pub fn followup_payload(
        &self,
        accumulated: &str,
        attempt: u32,
        policy: &ContinuationPolicy,
    ) -> UpstreamPayload {
        let mut messages = Vec::with_capacity(self.messages.len() + 2);
        messages.extend(self.messages.iter().cloned());
        messages.push(Message::new("assistant", accumulated));
        messages.push(Message::new("user", policy.prompt_for(attempt)));

        UpstreamPayload {
            model: self.upstream_model.clone(),
            messages,
            sampling: if policy.reuse_sampling {
                self.sampling.clone()
            } else {
                SamplingParams::default()
            },
            max_tokens: policy.followup_budget(self.max_tokens),
            chat_template_kwargs: self.template_kwargs(),
        }
    }

    fn template_kwargs(&self) -> Option<Value> {
        self.thinking.then(|| json!({"thinking": true}))
    }
}

/// Body of one upstream completion call, minus the `stream` flag which the
/// client sets per call mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamPayload {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_template_kwargs: Option<Value>,
}
