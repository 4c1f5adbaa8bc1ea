//! Provider trait — the abstraction over LLM backends.
//!
//! A `Provider` knows how to send a conversation to a model and surface the
//! reply as a stream of typed events. Implementations: native streaming
//! Ollama chat, and any OpenAI-compatible `/v1/chat/completions` endpoint
//! (which may answer non-streamingly as long as it synthesizes the same event
//! sequence on completion).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// A chat request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g. "qwen3:8b", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: ToolParameters,
}

/// A JSON-schema object of the `{type, properties, required}` form.
///
/// An empty properties map still serializes as `{}`, never `null` — some
/// backends reject a null schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type", default = "object_type")]
    pub kind: String,

    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

fn object_type() -> String {
    "object".into()
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            kind: object_type(),
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }
}

impl ToolParameters {
    /// Add a property to the schema.
    pub fn property(mut self, name: impl Into<String>, prop: ToolProperty) -> Self {
        self.properties
            .insert(name.into(), serde_json::json!(prop));
        self
    }

    /// Mark a property as required.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }
}

/// A single property inside a tool parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProperty {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ToolProperty {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            kind: "string".into(),
            description: description.into(),
        }
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self {
            kind: "integer".into(),
            description: description.into(),
        }
    }
}

/// A single event in a provider's reply stream.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// Partial assistant text.
    MessageDelta(String),

    /// The model started a tool call.
    ToolCallStart(ToolCall),

    /// The full assistant message (content + tool calls); last regular event.
    MessageEnd(Message),

    /// The stream failed; terminal.
    Error(ProviderError),
}

/// The core Provider trait.
///
/// `chat` returns a receiver that yields `LlmEvent`s and then closes. The
/// cancel token must interrupt an in-flight stream. Implementations must be
/// safe for concurrent `chat` calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g. "ollama", "openai").
    fn name(&self) -> &str;

    /// Send a request and stream the reply.
    async fn chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> std::result::Result<mpsc::Receiver<LlmEvent>, ProviderError>;
}

/// Append a "model may not be pulled" hint when an error message looks like a
/// missing-model failure from the backend.
pub fn enhance_model_error(message: &str, model: &str) -> String {
    let lower = message.to_lowercase();
    let missing = lower.contains("model")
        && (lower.contains("not found") || lower.contains("no such") || lower.contains("does not exist"));
    if !missing {
        return message.to_string();
    }
    if model.trim().is_empty() {
        format!("{message}\nhint: the model may not be pulled yet; run: ollama list / ollama pull <model>")
    } else {
        format!("{message}\nhint: the model may not be pulled yet; run: ollama pull {model}")
    }
}
