//! Agent events and the session event bus.
//!
//! The agent loop emits a finite, totally ordered stream of `AgentEvent`s per
//! prompt; the session republishes them (plus its own persistence/compaction
//! errors) to subscribers through the `EventBus`. Events are ephemeral — there
//! is no replay, a late subscriber misses earlier events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Events emitted while driving one prompt through the agent loop.
///
/// Ordering within a prompt is strict: `start` … (`turn_start` … deltas …
/// `turn_end` … tool results)* … `end`. A failed or cancelled prompt ends with
/// `error` and never emits `end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The loop has started.
    Start,

    /// A model turn is beginning.
    TurnStart,

    /// Partial text token from the model.
    Delta { text: String },

    /// The model (or the ReAct adapter) requested a tool call.
    ToolCall { id: String, name: String, args: String },

    /// A tool call completed; results arrive in call-index order.
    ToolResult { id: String, name: String, result: String },

    /// The model turn closed; the assistant message is complete.
    TurnEnd,

    /// The loop finished without further tool calls.
    End,

    /// The loop (or the session) hit an error; terminal for the prompt when
    /// emitted by the loop.
    Error { error: AgentError },
}

impl AgentEvent {
    /// Stable event name, e.g. for UI dispatch.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::TurnStart => "turn_start",
            Self::Delta { .. } => "delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::TurnEnd => "turn_end",
            Self::End => "end",
            Self::Error { .. } => "error",
        }
    }
}

/// Errors surfaced on the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentError {
    #[error("generation cancelled")]
    Cancelled,

    #[error("reached max turns limit ({limit})")]
    MaxTurnsReached { limit: u32 },

    #[error("chat request failed: {message}")]
    Chat { message: String },

    #[error("model stream failed: {message}")]
    Stream { message: String },

    #[error("hook failed: {message}")]
    Hook { message: String },

    #[error("persistence failed: {message} (buffered, will retry)")]
    Persistence { message: String },

    #[error("compaction failed: {message}")]
    Compaction { message: String },
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

/// A registered event callback.
///
/// Listeners run inline on the publisher's task and must not block
/// indefinitely.
pub type EventListener = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// A simple fan-out event bus.
///
/// `subscribe` returns an unsubscribe closure. `publish` snapshots the
/// listener set under a read lock so subscribe/unsubscribe during a publish
/// never race, then invokes listeners sequentially.
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Arc<RwLock<HashMap<u64, EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a listener; the returned closure removes it again.
    pub fn subscribe(&self, listener: EventListener) -> Box<dyn FnOnce() + Send> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().unwrap().insert(id, listener);

        let listeners = Arc::clone(&self.listeners);
        Box::new(move || {
            listeners.write().unwrap().remove(&id);
        })
    }

    /// Deliver an event to every current listener.
    pub fn publish(&self, event: &AgentEvent) {
        let snapshot: Vec<EventListener> = {
            let listeners = self.listeners.read().unwrap();
            listeners.values().cloned().collect()
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
