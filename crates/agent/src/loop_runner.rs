//! The agent loop — a turn state machine over one prompt.

use std::sync::Arc;

use futures::future::join_all;
use oxpilot_core::event::{AgentError, AgentEvent};
use oxpilot_core::message::{Message, ToolCall};
use oxpilot_core::provider::{ChatRequest, LlmEvent, Provider, ToolDefinition};
use oxpilot_core::tool::ToolRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::react::parse_react_tool_call;

/// Configuration for one run of the agent loop.
#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// Model name passed through to the provider.
    pub model: String,

    /// Tool catalogue sent to the model.
    pub tools: Vec<ToolDefinition>,

    /// Maximum number of turns; 0 means unlimited. Reaching the limit is an
    /// error, not a graceful termination.
    pub max_turns: u32,

    /// Prepended as a synthetic system message when non-empty.
    pub system_prompt: String,
}

/// Run the agent loop and return its event stream.
///
/// The caller has already appended the new user message to `messages`; the
/// loop operates on its own copy and publishes results back via events. The
/// stream is finite and closed exactly once. A successful run emits
/// `start … end`; cancellation and errors emit `error` and never `end`.
pub fn run_loop(
    cancel: CancellationToken,
    messages: Vec<Message>,
    config: LoopConfig,
    provider: Arc<dyn Provider>,
    tools: Option<Arc<ToolRegistry>>,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        drive(cancel, messages, config, provider, tools, tx).await;
    });
    rx
}

async fn drive(
    cancel: CancellationToken,
    messages: Vec<Message>,
    config: LoopConfig,
    provider: Arc<dyn Provider>,
    tools: Option<Arc<ToolRegistry>>,
    tx: mpsc::Sender<AgentEvent>,
) {
    let mut msgs = messages;
    if !config.system_prompt.is_empty() {
        msgs.insert(0, Message::system(&config.system_prompt));
    }

    let _ = tx.send(AgentEvent::Start).await;

    let mut turns: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            let _ = tx.send(AgentEvent::Error { error: AgentError::Cancelled }).await;
            return;
        }

        if config.max_turns > 0 && turns >= config.max_turns {
            warn!(limit = config.max_turns, "agent loop hit max turns");
            let _ = tx
                .send(AgentEvent::Error {
                    error: AgentError::MaxTurnsReached { limit: config.max_turns },
                })
                .await;
            return;
        }

        turns += 1;
        debug!(turn = turns, model = %config.model, "agent turn starting");
        let _ = tx.send(AgentEvent::TurnStart).await;

        let request = ChatRequest {
            model: config.model.clone(),
            messages: msgs.clone(),
            tools: config.tools.clone(),
            stream: true,
        };

        let chat_result = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.send(AgentEvent::Error { error: AgentError::Cancelled }).await;
                return;
            }
            res = provider.chat(cancel.clone(), request) => res,
        };
        let mut events = match chat_result {
            Ok(rx) => rx,
            Err(e) => {
                let _ = tx
                    .send(AgentEvent::Error {
                        error: AgentError::Chat { message: e.to_string() },
                    })
                    .await;
                return;
            }
        };

        // Collect this turn's reply
        let mut full_msg: Option<Message> = None;
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(AgentEvent::Error { error: AgentError::Cancelled }).await;
                    return;
                }
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };

            match event {
                LlmEvent::MessageDelta(delta) => {
                    let _ = tx.send(AgentEvent::Delta { text: delta }).await;
                }
                LlmEvent::ToolCallStart(call) => {
                    let _ = tx
                        .send(AgentEvent::ToolCall {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            args: call.function.arguments.clone(),
                        })
                        .await;
                }
                LlmEvent::MessageEnd(message) => {
                    tool_calls = message.tool_calls.clone();
                    full_msg = Some(message);
                }
                LlmEvent::Error(err) => {
                    let _ = tx
                        .send(AgentEvent::Error {
                            error: AgentError::Stream { message: err.to_string() },
                        })
                        .await;
                    return;
                }
            }
        }

        if let Some(msg) = &full_msg {
            msgs.push(msg.clone());
        }

        let _ = tx.send(AgentEvent::TurnEnd).await;

        // Text-mode fallback: when the model returned no native tool call,
        // try to parse an Action/Action Input pair out of its content.
        if tool_calls.is_empty() {
            if let Some(msg) = &full_msg {
                if let Some(call) = parse_react_tool_call(&msg.content, turns) {
                    let _ = tx
                        .send(AgentEvent::ToolCall {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            args: call.function.arguments.clone(),
                        })
                        .await;
                    tool_calls = vec![call];
                }
            }
        }

        if tool_calls.is_empty() {
            break;
        }

        let Some(registry) = &tools else {
            break;
        };

        let outcomes = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.send(AgentEvent::Error { error: AgentError::Cancelled }).await;
                return;
            }
            out = execute_tools_concurrent(&cancel, &tool_calls, registry) => out,
        };

        for outcome in outcomes {
            let _ = tx
                .send(AgentEvent::ToolResult {
                    id: outcome.tool_call_id.clone(),
                    name: outcome.name.clone(),
                    result: outcome.result.clone(),
                })
                .await;
            msgs.push(Message::tool_result(outcome.tool_call_id, outcome.result));
        }
    }

    let _ = tx.send(AgentEvent::End).await;
}

struct ToolExecOutcome {
    tool_call_id: String,
    name: String,
    result: String,
}

/// Execute all tool calls of one turn concurrently.
///
/// The result vector is indexed by call position regardless of completion
/// order. Per-call failures become `"error: …"` result strings — the model
/// needs to see the failure.
async fn execute_tools_concurrent(
    cancel: &CancellationToken,
    calls: &[ToolCall],
    registry: &Arc<ToolRegistry>,
) -> Vec<ToolExecOutcome> {
    let tasks = calls.iter().map(|call| {
        let registry = Arc::clone(registry);
        let cancel = cancel.clone();
        let call = call.clone();
        async move {
            let args = if call.function.arguments.trim().is_empty() {
                "{}"
            } else {
                call.function.arguments.as_str()
            };

            let result = match registry.execute(cancel, &call.function.name, args).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(tool = %call.function.name, error = %e, "tool execution failed");
                    format!("error: {e}")
                }
            };

            ToolExecOutcome {
                tool_call_id: call.id,
                name: call.function.name,
                result,
            }
        }
    });

    join_all(tasks).await
}
