//! Wire-level clients for text-generation servers.
//!
//! Only Ollama is supported. The client here knows the HTTP shape of a
//! backend and nothing about rate limiting or response normalization, which
//! live in [`crate::adapter`] and [`crate::completion`].

pub mod ollama;

pub use ollama::{GenerateOptions, GenerateRequest, GenerateResponse, OllamaClient};
