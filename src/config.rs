//! Configuration types for ollama-adapter.
//!
//! Config is loaded once from a TOML file and validated before the adapter
//! probes the backend. Invalid configs are rejected with a clear error rather
//! than silently falling back to defaults. The model id is the exception: it
//! is optional here so that the adapter constructor can report a missing model
//! as [`Error::Configuration`](crate::Error::Configuration).
//!
//! # Example
//! ```toml
//! [ollama]
//! endpoint = "http://localhost:11434/api"
//! model    = "deepseek-coder:6.7b"
//!
//! [limits]
//! max_requests_per_minute = 30
//!
//! [generation]
//! max_tokens = 2000
//! stop_token = "<|EOT|>"
//! truncation = "response_budget"
//!
//! [logging]
//! verbosity_level = 2
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level adapter configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let endpoint = self.ollama.endpoint.trim();
        anyhow::ensure!(!endpoint.is_empty(), "ollama.endpoint must not be empty");
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "ollama.endpoint `{endpoint}` must start with http:// or https://"
        );
        anyhow::ensure!(
            self.limits.max_requests_per_minute > 0,
            "limits.max_requests_per_minute must be greater than 0"
        );
        anyhow::ensure!(
            self.generation.max_tokens > 0,
            "generation.max_tokens must be greater than 0"
        );
        anyhow::ensure!(
            !self.generation.stop_token.is_empty(),
            "generation.stop_token must not be empty"
        );
        Ok(())
    }
}

/// Where the Ollama server lives and which model the adapter expects.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama API, including the `/api` prefix
    /// (default: `http://localhost:11434/api`). `/generate` is appended.
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// Model id probed at construction time. Required for the adapter to start.
    #[serde(default)]
    pub model: Option<String>,

    /// Per-request timeout in milliseconds.
    ///
    /// Leave unset to wait indefinitely; local models can take minutes to
    /// load on first use.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            model: None,
            timeout_ms: None,
        }
    }
}

impl OllamaConfig {
    /// The configured model id, or `None` when it is absent or blank.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    /// `{endpoint}/generate` with any trailing slash on the endpoint removed.
    pub fn generate_url(&self) -> String {
        format!("{}/generate", self.endpoint.trim().trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum completions started per rolling 60-second window (default: 60).
    #[serde(default = "defaults::max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: defaults::max_requests_per_minute(),
        }
    }
}

/// Generation options sent with every completion request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Token budget passed as `num_predict` (default: 2000).
    #[serde(default = "defaults::max_tokens")]
    pub max_tokens: u32,

    /// Literal end-of-output marker sent as the stop sequence and stripped
    /// from returned text (default: `<|EOT|>`).
    #[serde(default = "defaults::stop_token")]
    pub stop_token: String,

    /// How a truncated generation is recognised from the token counts.
    #[serde(default)]
    pub truncation: TruncationPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: defaults::max_tokens(),
            stop_token: defaults::stop_token(),
            truncation: TruncationPolicy::default(),
        }
    }
}

/// Accounting used to decide whether a generation hit its token budget.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Truncated when `eval_count == max_tokens - prompt_eval_count`.
    ///
    /// When the server does not report `prompt_eval_count` (or reports 0,
    /// e.g. for a cached prompt) the budget is `max_tokens - 100`.
    #[default]
    ResponseBudget,

    /// Truncated when `eval_count + prompt_eval_count == max_tokens`.
    TotalBudget,
}

impl std::fmt::Display for TruncationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ResponseBudget => "response_budget",
            Self::TotalBudget => "total_budget",
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Verbosity of the adapter's own diagnostics. At 2 or above each call
    /// logs which model it is generating with.
    #[serde(default)]
    pub verbosity_level: u8,

    /// Log filter used by the CLI when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

mod defaults {
    pub fn endpoint() -> String { "http://localhost:11434/api".into() }
    pub fn max_requests_per_minute() -> u32 { 60 }
    pub fn max_tokens() -> u32 { 2000 }
    pub fn stop_token() -> String { "<|EOT|>".into() }
}
