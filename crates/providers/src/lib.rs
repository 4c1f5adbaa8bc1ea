//! LLM backend implementations for oxpilot.
//!
//! Two backends implement the single `Provider` seam the core consumes:
//! - [`OllamaProvider`] speaks the native streaming `/api/chat` protocol;
//! - [`OpenAiCompatProvider`] speaks `/v1/chat/completions` non-streamingly
//!   and synthesizes the same event sequence on completion.

pub mod ollama;
pub mod openai_compat;

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
