//! Request defaults and response normalization.
//!
//! Everything here is pure: turning the backend's raw reply into a
//! [`Completion`] needs no I/O, which keeps the text and finish-reason rules
//! testable without a server.

use std::fmt;

use serde::Serialize;

use crate::config::TruncationPolicy;

/// Prompt tokens assumed when the server does not report `prompt_eval_count`.
pub const ASSUMED_PROMPT_TOKENS: u32 = 100;

/// A single completion call, with the same defaults as
/// [`CompletionAdapter::complete`](crate::CompletionAdapter::complete).
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    /// Sampling temperature (default: 0.2).
    pub temperature: f32,
    /// Added to 1.0 and sent as Ollama's `repeat_penalty` (default: 0.0).
    pub frequency_penalty: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
            frequency_penalty: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_frequency_penalty(mut self, frequency_penalty: f32) -> Self {
        self.frequency_penalty = frequency_penalty;
        self
    }

    /// Ollama has no frequency penalty; the closest knob is `repeat_penalty`,
    /// where 1.0 means "no penalty".
    pub fn repeat_penalty(&self) -> f32 {
        self.frequency_penalty + 1.0
    }

    /// Reject non-finite sampling parameters before they reach the wire.
    pub(crate) fn check(&self) -> Result<(), String> {
        if !self.temperature.is_finite() {
            return Err(format!("temperature must be finite, got {}", self.temperature));
        }
        if !self.frequency_penalty.is_finite() {
            return Err(format!(
                "frequency_penalty must be finite, got {}",
                self.frequency_penalty
            ));
        }
        Ok(())
    }
}

/// Why generation ended. Absent (`None`) means the token budget cut it short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model stopped on its own or emitted the stop token.
    Stop,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    /// `prompt_eval_count`; `None` when the server omitted it.
    pub prompt_tokens: Option<u32>,
    /// `eval_count`.
    pub completion_tokens: u32,
}

/// A normalized completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub text: String,
    /// `Some(Stop)` for a natural end, `None` when truncated.
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    /// Round trip latency in milliseconds, excluding time spent rate limited.
    pub latency_ms: u64,
}

impl Completion {
    /// `true` when the generation used up its token budget.
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.is_none()
    }

    /// The `(text, finish_reason)` pair most callers want.
    pub fn into_parts(self) -> (String, Option<FinishReason>) {
        (self.text, self.finish_reason)
    }
}

/// Remove trailing whitespace, then one trailing `stop_token` if present.
///
/// Anything before the stop token is kept verbatim, including whitespace.
pub fn strip_stop_token<'a>(text: &'a str, stop_token: &str) -> &'a str {
    let text = text.trim_end();
    if stop_token.is_empty() {
        return text;
    }
    text.strip_suffix(stop_token).unwrap_or(text)
}

/// Infer the finish reason from the reported token counts.
pub fn finish_reason(
    policy: TruncationPolicy,
    max_tokens: u32,
    usage: Usage,
) -> Option<FinishReason> {
    let prompt = usage.prompt_tokens.unwrap_or(0);
    let truncated = match policy {
        TruncationPolicy::TotalBudget => {
            u64::from(usage.completion_tokens) + u64::from(prompt) == u64::from(max_tokens)
        }
        TruncationPolicy::ResponseBudget => {
            let reserved = if prompt == 0 { ASSUMED_PROMPT_TOKENS } else { prompt };
            max_tokens
                .checked_sub(reserved)
                .is_some_and(|available| usage.completion_tokens == available)
        }
    };
    (!truncated).then_some(FinishReason::Stop)
}
