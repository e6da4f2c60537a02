//! Error taxonomy exposed to callers of the adapter.
//!
//! Internally the HTTP layer builds rich [`anyhow`] context chains. At the
//! adapter boundary those chains are logged and collapsed into one of two
//! variants, so callers can match on *what kind* of failure happened without
//! depending on `reqwest` or `serde_json` error types.

use thiserror::Error;

/// Errors returned by [`CompletionAdapter`](crate::CompletionAdapter).
#[derive(Debug, Error)]
pub enum Error {
    /// The adapter cannot be used as configured: the model is missing, the
    /// readiness probe failed, or call arguments are out of range.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The generation round trip failed (transport, HTTP status, or decoding).
    ///
    /// The underlying cause is logged at error level when the failure occurs
    /// and deliberately not carried here.
    #[error("Ollama inference failed for model `{model}`")]
    Upstream { model: String },
}

impl Error {
    pub(crate) fn upstream(model: &str) -> Self {
        Self::Upstream {
            model: model.to_owned(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
