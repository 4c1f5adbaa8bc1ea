//! Native streaming Ollama backend.
//!
//! Speaks `POST /api/chat` with newline-delimited JSON chunks. Content deltas
//! are forwarded as they arrive; native tool calls surface as
//! `ToolCallStart`; the accumulated assistant message is emitted on the final
//! `done` chunk.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use oxpilot_core::error::ProviderError;
use oxpilot_core::message::{Message, Role, ToolCall};
use oxpilot_core::provider::{ChatRequest, LlmEvent, Provider, ToolDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// An Ollama chat backend, e.g. `http://localhost:11434`.
pub struct OllamaProvider {
    host: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>) -> Self {
        // no client-level timeout: responses stream for as long as the model
        // keeps generating
        let client = reqwest::Client::builder()
            .build()
            .expect("failed to create HTTP client");
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Check that the Ollama server answers at all.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/", self.host))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: "ollama server unavailable".into(),
            });
        }
        Ok(())
    }

    /// Ping with bounded exponential backoff.
    pub async fn ping_with_retry(&self, max_retries: u32) -> Result<(), ProviderError> {
        let max_retries = max_retries.max(1);
        let mut last_err = ProviderError::Network("unreachable".into());
        for attempt in 0..max_retries {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
            if attempt + 1 == max_retries {
                break;
            }
            let backoff = Duration::from_millis(200 * (1u64 << attempt));
            debug!(attempt, backoff_ms = backoff.as_millis() as u64, "ollama ping failed, retrying");
            tokio::time::sleep(backoff).await;
        }
        Err(last_err)
    }

    /// List locally available model names.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        #[derive(Deserialize)]
        struct Tags {
            #[serde(default)]
            models: Vec<TagModel>,
        }
        #[derive(Deserialize)]
        struct TagModel {
            name: String,
        }

        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let tags: Tags = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("failed to parse model list: {e}"),
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, ProviderError> {
        let url = format!("{}/api/chat", self.host);
        let model = request.model.clone();
        let body = ApiChatRequest {
            model: request.model.clone(),
            messages: to_api_messages(&request.messages),
            tools: to_api_tools(&request.tools),
            stream: true,
        };

        let (tx, rx) = mpsc::channel(32);
        let client = self.client.clone();

        tokio::spawn(async move {
            let response = tokio::select! {
                _ = cancel.cancelled() => return,
                res = client.post(&url).json(&body).send() => match res {
                    Ok(response) => response,
                    Err(e) => {
                        let _ = tx.send(LlmEvent::Error(ProviderError::Network(e.to_string()))).await;
                        return;
                    }
                },
            };

            let status = response.status().as_u16();
            if status != 200 {
                let text = response.text().await.unwrap_or_default();
                let lower = text.to_lowercase();
                let err = if lower.contains("model") && lower.contains("not found") {
                    ProviderError::ModelNotFound(model)
                } else {
                    ProviderError::ApiError {
                        status_code: status,
                        message: text,
                    }
                };
                let _ = tx.send(LlmEvent::Error(err)).await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            let mut full_content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = stream.next() => match next {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            let _ = tx
                                .send(LlmEvent::Error(ProviderError::StreamInterrupted(e.to_string())))
                                .await;
                            return;
                        }
                        None => break,
                    },
                };

                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = &line[..line.len() - 1];
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }

                    let parsed: ApiChatChunk = match serde_json::from_slice(line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed ollama chunk");
                            continue;
                        }
                    };

                    if let Some(message) = parsed.error {
                        let _ = tx
                            .send(LlmEvent::Error(ProviderError::ApiError {
                                status_code: 200,
                                message,
                            }))
                            .await;
                        return;
                    }

                    if let Some(message) = parsed.message {
                        if !message.content.is_empty() {
                            full_content.push_str(&message.content);
                            let _ = tx.send(LlmEvent::MessageDelta(message.content)).await;
                        }
                        for tc in message.tool_calls {
                            let id = if tc.id.is_empty() {
                                tc.function.name.clone()
                            } else {
                                tc.id
                            };
                            let arguments =
                                serde_json::to_string(&tc.function.arguments).unwrap_or_else(|_| "{}".into());
                            let call = ToolCall::function(id, tc.function.name, arguments);
                            tool_calls.push(call.clone());
                            let _ = tx.send(LlmEvent::ToolCallStart(call)).await;
                        }
                    }

                    if parsed.done {
                        let message = Message::assistant(full_content.clone())
                            .with_tool_calls(tool_calls.clone());
                        let _ = tx.send(LlmEvent::MessageEnd(message)).await;
                    }
                }
            }
        });

        Ok(rx)
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: oxpilot_core::provider::ToolParameters,
}

#[derive(Debug, Deserialize)]
struct ApiChatChunk {
    #[serde(default)]
    message: Option<ApiChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiChunkToolCall {
    #[serde(default)]
    id: String,
    function: ApiChunkToolFunction,
}

#[derive(Debug, Deserialize)]
struct ApiChunkToolFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            content: m.content.clone(),
            images: m
                .images
                .iter()
                .filter(|path| !path.is_empty())
                .filter_map(|path| match std::fs::read(path) {
                    Ok(bytes) => Some(BASE64.encode(bytes)),
                    Err(e) => {
                        warn!(path, error = %e, "skipping unreadable image attachment");
                        None
                    }
                })
                .collect(),
        })
        .collect()
}

fn to_api_tools(tools: &[ToolDefinition]) -> Option<Vec<ApiTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| ApiTool {
                kind: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxpilot_core::provider::{ToolParameters, ToolProperty};

    #[test]
    fn host_is_normalized() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        assert_eq!(provider.host(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn ping_fails_on_unreachable_host() {
        // port 1 is never an ollama server; connection is refused immediately
        let provider = OllamaProvider::new("http://127.0.0.1:1");
        let err = provider.ping().await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn ping_with_retry_gives_up_after_backoff() {
        let provider = OllamaProvider::new("http://127.0.0.1:1");
        let started = std::time::Instant::now();
        let err = provider.ping_with_retry(2).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        // one backoff interval between the two attempts
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn tool_wire_format_wraps_function() {
        let tools = vec![ToolDefinition {
            name: "shell".into(),
            description: "run a command".into(),
            parameters: ToolParameters::default()
                .property("command", ToolProperty::string("command line"))
                .require("command"),
        }];
        let api = to_api_tools(&tools).unwrap();
        let json = serde_json::to_string(&api[0]).unwrap();
        assert!(json.contains(r#""type":"function""#));
        assert!(json.contains(r#""name":"shell""#));
        assert!(json.contains(r#""properties""#));
    }

    #[test]
    fn empty_tools_serialize_as_absent() {
        assert!(to_api_tools(&[]).is_none());
    }

    #[test]
    fn chunk_with_tool_call_parses() {
        let line = r#"{"message":{"content":"","tool_calls":[{"function":{"name":"read_file","arguments":{"path":"x"}}}]},"done":false}"#;
        let chunk: ApiChatChunk = serde_json::from_str(line).unwrap();
        let message = chunk.message.unwrap();
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].function.name, "read_file");
    }

    #[test]
    fn missing_images_are_skipped() {
        let msgs = vec![Message::user("look").with_images(vec!["/no/such/image.png".into()])];
        let api = to_api_messages(&msgs);
        assert!(api[0].images.is_empty());
    }
}
