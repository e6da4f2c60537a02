//! Ollama native `/api/generate` client.
//!
//! Speaks Ollama's own single-shot generation endpoint rather than the
//! OpenAI-compat layer: the native reply carries `eval_count` and
//! `prompt_eval_count`, which the adapter needs to tell a natural stop from a
//! truncated one.
//!
//! Errors are [`anyhow`] chains with enough context to diagnose a failure from
//! the log line alone. Callers decide how much of that to surface.

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;

/// `POST /generate` body for a full generation.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub system: &'a str,
    pub stream: bool,
    pub options: GenerateOptions<'a>,
}

#[derive(Debug, Serialize)]
pub struct GenerateOptions<'a> {
    pub num_predict: u32,
    pub stop: [&'a str; 1],
    pub repeat_penalty: f32,
    pub temperature: f32,
}

/// `POST /generate` body for the readiness probe.
///
/// With no prompt Ollama just loads the model into memory and returns.
#[derive(Debug, Serialize)]
struct ProbeRequest<'a> {
    model: &'a str,
}

/// The fields of a non-streaming `/generate` reply the adapter consumes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GenerateResponse {
    pub response: String,
    /// Tokens generated. Required: without it truncation cannot be judged.
    pub eval_count: u32,
    /// Prompt tokens evaluated. Omitted when the prompt was fully cached.
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
}

/// HTTP client bound to one Ollama endpoint.
///
/// [`Client`] holds an `Arc` internally, so cloning this is cheap and clones
/// share one connection pool.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    generate_url: String,
}

impl OllamaClient {
    /// Build a client for the configured endpoint.
    ///
    /// A timeout is applied only when `cfg.timeout_ms` is set.
    pub fn new(cfg: &OllamaConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(ms) = cfg.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            generate_url: cfg.generate_url(),
        })
    }

    pub fn generate_url(&self) -> &str {
        &self.generate_url
    }

    /// Ask Ollama to load `model`, failing on any non-2xx status.
    pub async fn probe(&self, model: &str) -> anyhow::Result<()> {
        let url = &self.generate_url;
        let response = self
            .client
            .post(url)
            .json(&ProbeRequest { model })
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned HTTP {status}: {text}");
        }
        Ok(())
    }

    /// Run one non-streaming generation.
    ///
    /// # Errors
    /// Returns an error if the network request fails, Ollama returns a non-2xx
    /// status, or the body is not a JSON generate reply (including `null`).
    pub async fn generate(&self, body: &GenerateRequest<'_>) -> anyhow::Result<GenerateResponse> {
        let url = &self.generate_url;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading Ollama response body")?;

        if !status.is_success() {
            anyhow::bail!("Ollama returned HTTP {status}: {text}");
        }

        let parsed: Option<GenerateResponse> = serde_json::from_str(&text)
            .with_context(|| format!("parsing Ollama response as JSON: {text}"))?;
        parsed.context("Ollama returned a null response")
    }
}
