//! OpenAI-compatible provider.
//!
//! Works with OpenAI, OpenRouter, vLLM, Ollama's `/v1` shim, and any other
//! endpoint exposing `/chat/completions`. The request is made non-streamingly;
//! on completion the same `MessageDelta* → ToolCallStart* → MessageEnd` event
//! sequence as the native backend is synthesized, so the agent loop never
//! needs to know which backend answered.

use async_trait::async_trait;
use oxpilot_core::error::ProviderError;
use oxpilot_core::message::{Message, Role, ToolCall};
use oxpilot_core::provider::{ChatRequest, LlmEvent, Provider, ToolDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Convenience constructor for api.openai.com.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system".into(),
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                kind: "function".into(),
                                function: ApiFunction {
                                    name: tc.function.name.clone(),
                                    arguments: tc.function.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                kind: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: serde_json::json!(t.parameters),
                },
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request.model.clone();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(provider = %self.name, model = %model, "sending completion request");

        let (tx, rx) = mpsc::channel(8);
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let send = client
                .post(&url)
                .header("Authorization", format!("Bearer {api_key}"))
                .header("Content-Type", "application/json")
                .json(&body)
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => return,
                res = send => match res {
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
                warn!(status, body = %text, "provider returned error");
                let err = match status {
                    429 => ProviderError::RateLimited { retry_after_secs: 5 },
                    401 | 403 => ProviderError::AuthenticationFailed(
                        "invalid API key or insufficient permissions".into(),
                    ),
                    404 if text.to_lowercase().contains("model") => {
                        ProviderError::ModelNotFound(model)
                    }
                    _ => ProviderError::ApiError {
                        status_code: status,
                        message: text,
                    },
                };
                let _ = tx.send(LlmEvent::Error(err)).await;
                return;
            }

            let api_response: ApiResponse = match response.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    let _ = tx
                        .send(LlmEvent::Error(ProviderError::ApiError {
                            status_code: 200,
                            message: format!("failed to parse response: {e}"),
                        }))
                        .await;
                    return;
                }
            };

            let Some(choice) = api_response.choices.into_iter().next() else {
                let _ = tx
                    .send(LlmEvent::Error(ProviderError::ApiError {
                        status_code: 200,
                        message: "no choices in response".into(),
                    }))
                    .await;
                return;
            };

            // synthesize the streaming event sequence from the full reply
            let content = choice.message.content.unwrap_or_default();
            let tool_calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall::function(tc.id, tc.function.name, tc.function.arguments))
                .collect();

            if !content.is_empty() {
                let _ = tx.send(LlmEvent::MessageDelta(content.clone())).await;
            }
            for call in &tool_calls {
                let _ = tx.send(LlmEvent::ToolCallStart(call.clone())).await;
            }
            let message = Message::assistant(content).with_tool_calls(tool_calls);
            let _ = tx.send(LlmEvent::MessageEnd(message)).await;
        });

        Ok(rx)
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    #[serde(rename = "type")]
    kind: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}
