use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ollama_adapter::{CompletionAdapter, CompletionRequest, Config};

/// Run one completion against a local Ollama server.
#[derive(Debug, Parser)]
#[command(name = "ollama-complete", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "OLLAMA_ADAPTER_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Model to generate with (defaults to `ollama.model` from the config).
    #[arg(long)]
    model: Option<String>,

    /// System prompt.
    #[arg(long, default_value = "")]
    system: String,

    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    #[arg(long, default_value_t = 0.0)]
    frequency_penalty: f32,

    /// User prompt.
    prompt: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    // Initialise tracing
    let default_filter = config
        .logging
        .log_level
        .clone()
        .unwrap_or_else(|| "ollama_adapter=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        endpoint = %config.ollama.endpoint,
        rpm = config.limits.max_requests_per_minute,
        "ollama-complete starting"
    );

    let adapter = CompletionAdapter::new(&config).await?;
    let model = cli.model.unwrap_or_else(|| adapter.model().to_owned());

    let request = CompletionRequest::new(model, cli.system, cli.prompt)
        .with_temperature(cli.temperature)
        .with_frequency_penalty(cli.frequency_penalty);
    let (text, finish_reason) = adapter.complete_request(&request).await?.into_parts();

    println!("{text}");
    match finish_reason {
        Some(reason) => eprintln!("finish_reason: {reason}"),
        None => eprintln!("finish_reason: none (truncated)"),
    }

    Ok(())
}
