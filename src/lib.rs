//! Rate-limited completion adapter for a local Ollama server.
//!
//! Callers hand the adapter a system prompt and a user prompt and get back
//! normalized text plus a finish reason, without knowing Ollama's wire format.
//!
//! ```rust,ignore
//! use ollama_adapter::{CompletionAdapter, Config};
//!
//! let config = Config::load("config.toml".as_ref())?;
//! let adapter = CompletionAdapter::new(&config).await?;
//! let (text, finish_reason) = adapter
//!     .complete(adapter.model(), "You are terse.", "Say hi.", 0.2, 0.0)
//!     .await?
//!     .into_parts();
//! ```

pub mod adapter;
pub mod backends;
pub mod completion;
pub mod config;
pub mod error;
pub mod rate_limit;

pub use adapter::CompletionAdapter;
pub use completion::{Completion, CompletionRequest, FinishReason, Usage};
pub use config::{Config, TruncationPolicy};
pub use error::{Error, Result};
pub use rate_limit::RateLimiter;
