//! Continuation policy: when a response counts as too short and how the
//! follow-up request is shaped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Follow-up instructions used when none are configured.
pub const DEFAULT_CONTINUATION_PROMPTS: &[&str] = &[
    "Continue exactly where you left off. Do not repeat or summarize what you already wrote.",
    "Keep going from your last sentence and add new detail instead of restating earlier parts.",
    "Continue the response seamlessly. Pick up mid-thought if needed and do not start over.",
];

/// Governs the continuation loop of one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationPolicy {
    pub enabled: bool,
    /// Target length in generation units; reaching it ends the loop.
    pub min_desired_units: usize,
    /// Maximum number of follow-up calls.
    pub max_attempts: u32,
    /// Follow-up instructions, picked round-robin by attempt index.
    pub prompts: Vec<String>,
    /// Follow-ups producing fewer (trimmed) characters than this end the loop.
    pub min_viable_chars: usize,
    /// Synthetic delta written between phases.
    pub separator: String,
    /// Upper bound for the token budget of follow-up calls.
    pub followup_max_tokens: Option<u32>,
    /// Whether follow-ups repeat the request's sampling parameters or leave
    /// them to upstream defaults.
    pub reuse_sampling: bool,
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min_desired_units: 1000,
            max_attempts: 2,
            prompts: DEFAULT_CONTINUATION_PROMPTS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            min_viable_chars: 50,
            separator: "\n\n".to_string(),
            followup_max_tokens: None,
            reuse_sampling: true,
        }
    }
}

impl ContinuationPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Instruction for follow-up number `attempt` (1-based).
    pub fn prompt_for(&self, attempt: u32) -> &str {
        if self.prompts.is_empty() {
            return DEFAULT_CONTINUATION_PROMPTS[attempt as usize % DEFAULT_CONTINUATION_PROMPTS.len()];
        }
        &self.prompts[attempt as usize % self.prompts.len()]
    }

    /// Decide after a phase whether to stop. `None` means run another follow-up.
    pub fn decide(&self, units: usize, attempts: u32) -> Option<StopReason> {
        if !self.enabled {
            Some(StopReason::Disabled)
        } else if units >= self.min_desired_units {
            Some(StopReason::ThresholdMet)
        } else if attempts >= self.max_attempts {
            Some(StopReason::AttemptsExhausted)
        } else {
            None
        }
    }

    /// Whether a follow-up produced enough text to keep it.
    pub fn is_viable(&self, text: &str) -> bool {
        text.trim().chars().count() >= self.min_viable_chars
    }

    /// Token budget for a follow-up call given the request's budget.
    pub fn followup_budget(&self, base: Option<u32>) -> Option<u32> {
        match (base, self.followup_max_tokens) {
            (Some(base), Some(cap)) => Some(base.min(cap)),
            (None, cap) => cap,
            (base, None) => base,
        }
    }
}

/// Phase of an orchestrated exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    /// Follow-up number k, starting at 1.
    Continuing(u32),
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::Continuing(_) => "continuation",
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            Phase::Initial => 0,
            Phase::Continuing(k) => *k,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Initial => f.write_str("initial"),
            Phase::Continuing(k) => write!(f, "continuation#{}", k),
        }
    }
}

/// Why the continuation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Disabled,
    ThresholdMet,
    AttemptsExhausted,
    /// A follow-up came back implausibly short.
    Degenerate,
    /// A follow-up failed at the transport level; prior output was kept.
    ContinuationFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Disabled => "disabled",
            StopReason::ThresholdMet => "threshold_met",
            StopReason::AttemptsExhausted => "attempts_exhausted",
            StopReason::Degenerate => "degenerate",
            StopReason::ContinuationFailed => "continuation_failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
