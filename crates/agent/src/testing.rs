//! Scripted providers for loop and session tests.
//!
//! `ScriptedProvider` plays back a fixed sequence of event batches, one batch
//! per `chat` call, and records every request it receives so tests can assert
//! on what the model was actually sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use oxpilot_core::error::ProviderError;
use oxpilot_core::message::{Message, ToolCall};
use oxpilot_core::provider::{ChatRequest, LlmEvent, Provider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum Mode {
    /// One event batch per chat call, in order.
    Sequence(VecDeque<Vec<LlmEvent>>),
    /// Every chat call returns a fresh tool call — the model never stops.
    RepeatToolCall { name: String, args: String },
    /// The stream stays open and never yields; only cancellation ends it.
    Hanging,
}

pub struct ScriptedProvider {
    mode: Mutex<Mode>,
    calls: Mutex<u32>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn script(batches: Vec<Vec<LlmEvent>>) -> Self {
        Self {
            mode: Mutex::new(Mode::Sequence(batches.into())),
            calls: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that streams a single text reply with no tool calls.
    pub fn single_text(text: &str) -> Self {
        Self::script(vec![text_events(text)])
    }

    /// A provider that returns a tool call on every turn, forever.
    pub fn repeat_tool_call(name: &str, args: &str) -> Self {
        Self {
            mode: Mutex::new(Mode::RepeatToolCall {
                name: name.to_string(),
                args: args.to_string(),
            }),
            calls: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose stream blocks until the caller goes away.
    pub fn hanging() -> Self {
        Self {
            mode: Mutex::new(Mode::Hanging),
            calls: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        _cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };

        let events = {
            let mut mode = self.mode.lock().unwrap();
            match &mut *mode {
                Mode::Sequence(batches) => match batches.pop_front() {
                    Some(batch) => batch,
                    None => vec![LlmEvent::Error(ProviderError::ApiError {
                        status_code: 500,
                        message: "scripted provider exhausted".into(),
                    })],
                },
                Mode::RepeatToolCall { name, args } => tool_call_events(
                    &format!("tc-{call_index}"),
                    name,
                    args,
                    "",
                ),
                Mode::Hanging => {
                    let (tx, rx) = mpsc::channel(1);
                    tokio::spawn(async move {
                        tx.closed().await;
                    });
                    return Ok(rx);
                }
            }
        };

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(event).await;
        }
        Ok(rx)
    }
}

/// Event batch for a plain text reply.
pub fn text_events(text: &str) -> Vec<LlmEvent> {
    vec![
        LlmEvent::MessageDelta(text.to_string()),
        LlmEvent::MessageEnd(Message::assistant(text)),
    ]
}

/// Event batch for a reply that calls one tool, with optional thought text.
pub fn tool_call_events(id: &str, name: &str, args: &str, thought: &str) -> Vec<LlmEvent> {
    let call = ToolCall::function(id, name, args);
    let mut events = Vec::new();
    if !thought.is_empty() {
        events.push(LlmEvent::MessageDelta(thought.to_string()));
    }
    events.push(LlmEvent::ToolCallStart(call.clone()));
    events.push(LlmEvent::MessageEnd(
        Message::assistant(thought).with_tool_calls(vec![call]),
    ));
    events
}
