//! # oxpilot Core
//!
//! Domain types, traits, and error definitions for the oxpilot coding
//! assistant. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping LLM backends via configuration
//! - Easy testing with scripted/mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, SessionError, ToolError};
pub use event::{AgentError, AgentEvent, EventBus, EventListener};
pub use message::{Message, Role, ToolCall, ToolCallFunction};
pub use provider::{ChatRequest, LlmEvent, Provider, ToolDefinition, ToolParameters, ToolProperty};
pub use tool::{Tool, ToolRegistry};
