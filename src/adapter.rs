//! The completion adapter: the one type other pipeline code talks to.
//!
//! Construction probes Ollama so that a missing model fails fast. Each
//! [`complete`](CompletionAdapter::complete) call then waits for a rate-limit
//! slot, issues one generation, and normalizes the reply into a
//! [`Completion`]. No retries are attempted.

use std::{sync::Arc, time::Instant};

use tracing::{debug, error, info, Instrument as _};
use uuid::Uuid;

use crate::{
    backends::{GenerateOptions, GenerateRequest, OllamaClient},
    completion::{self, Completion, CompletionRequest, Usage},
    config::{Config, GenerationConfig},
    error::{Error, Result},
    rate_limit::RateLimiter,
};

/// Rate-limited client for a local Ollama server.
///
/// Cloning is cheap; clones share the rate limiter and the HTTP connection
/// pool, so one adapter can be handed to many concurrent tasks.
#[derive(Debug, Clone)]
pub struct CompletionAdapter {
    client: OllamaClient,
    limiter: Arc<RateLimiter>,
    model: String,
    generation: GenerationConfig,
    verbosity_level: u8,
}

impl CompletionAdapter {
    /// Build an adapter with its own rate limiter and probe the configured model.
    ///
    /// # Errors
    /// [`Error::Configuration`] if no model is configured, the HTTP client
    /// cannot be built, or Ollama does not accept the probe.
    pub async fn new(config: &Config) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.limits.max_requests_per_minute));
        Self::with_rate_limiter(config, limiter).await
    }

    /// Like [`new`](Self::new), but draws slots from a limiter shared with
    /// other adapters.
    pub async fn with_rate_limiter(config: &Config, limiter: Arc<RateLimiter>) -> Result<Self> {
        let model = config
            .ollama
            .model()
            .ok_or_else(|| Error::Configuration("Ollama model is not available".into()))?
            .to_owned();

        let client = OllamaClient::new(&config.ollama)
            .map_err(|e| Error::Configuration(format!("{e:#}")))?;

        info!(%model, url = client.generate_url(), "loading Ollama model");
        if let Err(e) = client.probe(&model).await {
            error!(%model, error = %format!("{e:#}"), "Ollama model probe failed");
            return Err(Error::Configuration(format!(
                "Ollama model `{model}` is not available: {e:#}"
            )));
        }

        Ok(Self {
            client,
            limiter,
            model,
            generation: config.generation.clone(),
            verbosity_level: config.logging.verbosity_level,
        })
    }

    /// The model probed at construction time.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Generate a completion for `user` under the `system` prompt.
    ///
    /// Suspends until the rate limiter grants a slot. The returned text has
    /// trailing whitespace and a trailing stop token removed; the finish
    /// reason is `None` when the generation used up its token budget.
    ///
    /// # Errors
    /// [`Error::Configuration`] for non-finite sampling parameters;
    /// [`Error::Upstream`] for any failure during the HTTP round trip.
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        temperature: f32,
        frequency_penalty: f32,
    ) -> Result<Completion> {
        let request = CompletionRequest::new(model, system, user)
            .with_temperature(temperature)
            .with_frequency_penalty(frequency_penalty);
        self.complete_request(&request).await
    }

    /// [`complete`](Self::complete) taking a prepared [`CompletionRequest`].
    pub async fn complete_request(&self, request: &CompletionRequest) -> Result<Completion> {
        request.check().map_err(Error::Configuration)?;

        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("completion", id = %request_id, model = %request.model);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &CompletionRequest) -> Result<Completion> {
        if self.verbosity_level >= 2 {
            debug!("Generating completion with {}", request.model);
        }

        self.limiter.acquire().await;

        info!("-----------------");
        info!("Running inference ...");
        debug!("system:\n{}", request.system);
        debug!("user:\n{}", request.user);

        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.user,
            system: &request.system,
            stream: false,
            options: GenerateOptions {
                num_predict: self.generation.max_tokens,
                stop: [self.generation.stop_token.as_str()],
                repeat_penalty: request.repeat_penalty(),
                temperature: request.temperature,
            },
        };

        let started = Instant::now();
        let reply = match self.client.generate(&body).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Error during Ollama inference");
                return Err(Error::upstream(&request.model));
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let text = completion::strip_stop_token(&reply.response, &self.generation.stop_token);
        let usage = Usage {
            prompt_tokens: reply.prompt_eval_count,
            completion_tokens: reply.eval_count,
        };
        let finish_reason =
            completion::finish_reason(self.generation.truncation, self.generation.max_tokens, usage);

        debug!("response:\n{text}");
        info!(
            latency_ms,
            completion_tokens = usage.completion_tokens,
            truncated = finish_reason.is_none(),
            "done"
        );
        info!("-----------------");

        Ok(Completion {
            text: text.to_owned(),
            finish_reason,
            usage,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{completion::FinishReason, config::TruncationPolicy};
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.ollama.endpoint = format!("{}/api", server.uri());
        config.ollama.model = Some("test-model".into());
        config.ollama.timeout_ms = Some(5_000);
        config.limits.max_requests_per_minute = 1_000;
        config.logging.verbosity_level = 2;
        config
    }

    /// Mounts a probe handler that answers the `{"model": ...}` body only.
    async fn mount_probe(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "test-model", "response": "", "done": true
            })))
            .mount(server)
            .await;
    }

    async fn mount_generate(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "stream": false })))
            .respond_with(template)
            .mount(server)
            .await;
    }

    async fn ready_adapter(server: &MockServer) -> CompletionAdapter {
        mount_probe(server).await;
        CompletionAdapter::new(&config_for(server))
            .await
            .expect("adapter should start")
    }

    /// Collects formatted log output for assertions.
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn reply(response: &str, eval_count: u32, prompt_eval_count: u32) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "response": response,
            "done": true,
            "eval_count": eval_count,
            "prompt_eval_count": prompt_eval_count,
        }))
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn new_probes_the_configured_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = CompletionAdapter::new(&config_for(&server)).await.unwrap();
        assert_eq!(adapter.model(), "test-model");
        assert_eq!(adapter.rate_limiter().rpm, 1_000);
    }

    #[tokio::test]
    async fn new_fails_with_configuration_error_when_model_missing() {
        let server = MockServer::start().await;
        let mut config = config_for(&server);
        config.ollama.model = None;

        let err = CompletionAdapter::new(&config).await.unwrap_err();
        assert!(
            matches!(err, Error::Configuration(ref msg) if msg.contains("not available")),
            "got: {err:?}"
        );
        assert!(server.received_requests().await.unwrap().is_empty(), "no probe expected");
    }

    #[tokio::test]
    async fn new_fails_when_probe_returns_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"error":"model 'test-model' not found"}"#),
            )
            .mount(&server)
            .await;

        let err = CompletionAdapter::new(&config_for(&server)).await.unwrap_err();
        match err {
            Error::Configuration(msg) => assert!(msg.contains("404"), "message: {msg}"),
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_fails_when_server_is_unreachable() {
        let mut config = Config::default();
        config.ollama.endpoint = "http://127.0.0.1:9/api".into();
        config.ollama.model = Some("test-model".into());
        config.ollama.timeout_ms = Some(2_000);

        let err = CompletionAdapter::new(&config).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn adapters_can_share_one_limiter() {
        let server = MockServer::start().await;
        mount_probe(&server).await;
        let config = config_for(&server);
        let limiter = Arc::new(RateLimiter::new(7));

        let a = CompletionAdapter::with_rate_limiter(&config, Arc::clone(&limiter)).await.unwrap();
        let b = CompletionAdapter::with_rate_limiter(&config, Arc::clone(&limiter)).await.unwrap();
        assert!(Arc::ptr_eq(a.rate_limiter(), b.rate_limiter()));
    }

    // -----------------------------------------------------------------------
    // complete
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn complete_strips_stop_token_and_reports_stop() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, reply("hello<|EOT|>", 5, 10)).await;

        let completion = adapter.complete("m", "sys", "hi", 0.2, 0.0).await.unwrap();
        assert_eq!(
            completion.clone().into_parts(),
            ("hello".to_string(), Some(FinishReason::Stop))
        );
        assert_eq!(
            completion.usage,
            Usage {
                prompt_tokens: Some(10),
                completion_tokens: 5
            }
        );
    }

    #[tokio::test]
    async fn complete_sends_the_full_generation_payload() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "coder",
                "prompt": "write a test",
                "system": "you are terse",
                "stream": false,
                "options": {
                    "num_predict": 2000,
                    "stop": ["<|EOT|>"],
                    "repeat_penalty": 1.5,
                    "temperature": 0.75,
                }
            })))
            .respond_with(reply("ok", 1, 1))
            .expect(1)
            .mount(&server)
            .await;

        let completion = adapter
            .complete("coder", "you are terse", "write a test", 0.75, 0.5)
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");
    }

    #[tokio::test]
    async fn complete_reports_truncation_when_budget_is_exhausted() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, reply("partial answer", 1990, 10)).await;

        let completion = adapter.complete("m", "", "go", 0.2, 0.0).await.unwrap();
        assert_eq!(completion.text, "partial answer");
        assert!(completion.is_truncated());
    }

    #[tokio::test]
    async fn complete_uses_configured_truncation_policy() {
        let server = MockServer::start().await;
        mount_probe(&server).await;
        let mut config = config_for(&server);
        config.generation.truncation = TruncationPolicy::TotalBudget;
        let adapter = CompletionAdapter::new(&config).await.unwrap();
        // Under the response budget 1900 tokens with an unreported prompt would be truncated.
        mount_generate(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "response": "long", "eval_count": 1900
            })),
        )
        .await;

        let completion = adapter.complete("m", "", "go", 0.2, 0.0).await.unwrap();
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn complete_maps_http_error_to_upstream() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, ResponseTemplate::new(500).set_body_string("boom")).await;

        let err = adapter.complete("m", "", "hi", 0.2, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { ref model } if model == "m"), "got: {err:?}");
    }

    #[tokio::test]
    async fn complete_maps_malformed_json_to_upstream() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, ResponseTemplate::new(200).set_body_string("{\"response\": 4")).await;

        let err = adapter.complete("m", "", "hi", 0.2, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn complete_maps_missing_eval_count_to_upstream() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({ "response": "hello<|EOT|>" })),
        )
        .await;

        let err = adapter.complete("m", "", "hi", 0.2, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn complete_maps_null_body_to_upstream() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, ResponseTemplate::new(200).set_body_string("null")).await;

        let err = adapter.complete("m", "", "hi", 0.2, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn complete_rejects_non_finite_temperature_without_calling_backend() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, reply("unused", 1, 1)).await;

        let err = adapter.complete("m", "", "hi", f32::NAN, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err:?}");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1, "only the construction probe should have been sent");
    }

    #[tokio::test]
    async fn complete_request_applies_builder_overrides() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "options": { "temperature": 0.0, "repeat_penalty": 1.25f32 }
            })))
            .respond_with(reply("tuned", 3, 3))
            .expect(1)
            .mount(&server)
            .await;

        let request = CompletionRequest::new("m", "", "hi")
            .with_temperature(0.0)
            .with_frequency_penalty(0.25);
        let completion = adapter.complete_request(&request).await.unwrap();
        assert_eq!(completion.text, "tuned");
    }

    #[tokio::test]
    async fn complete_brackets_inference_with_separator_lines() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, reply("hello<|EOT|>", 5, 10)).await;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&captured);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || CaptureWriter(Arc::clone(&writer)))
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        adapter.complete("m", "sys", "hi", 0.2, 0.0).await.unwrap();

        let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        let first_sep = lines.iter().position(|l| l.ends_with("-----------------"));
        let running = lines.iter().position(|l| l.contains("Running inference"));
        let done = lines.iter().position(|l| l.contains("done"));
        let last_sep = lines.iter().rposition(|l| l.ends_with("-----------------"));
        assert!(
            matches!((first_sep, running, done, last_sep), (Some(a), Some(b), Some(c), Some(d)) if a < b && b < c && c < d),
            "unexpected log order:\n{output}"
        );
    }

    #[tokio::test]
    async fn each_completion_consumes_a_rate_limit_slot() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, reply("x", 1, 1)).await;

        for _ in 0..3 {
            adapter.complete("m", "", "hi", 0.2, 0.0).await.unwrap();
        }
        assert_eq!(adapter.rate_limiter().in_window(), 3);
    }

    #[tokio::test]
    async fn failed_calls_still_count_against_the_limit() {
        let server = MockServer::start().await;
        let adapter = ready_adapter(&server).await;
        mount_generate(&server, ResponseTemplate::new(503)).await;

        let _ = adapter.complete("m", "", "hi", 0.2, 0.0).await;
        assert_eq!(adapter.rate_limiter().in_window(), 1);
    }
}
