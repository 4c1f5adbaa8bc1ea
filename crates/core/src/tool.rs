//! Tool trait and the tool dispatcher.
//!
//! Tools are what give the agent the ability to act in the world: execute
//! shell commands, read/write files, and so on. The registry maps stable
//! names to capabilities and dispatches calls; it never interprets the
//! argument JSON — that is passed to the tool verbatim.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::{ToolDefinition, ToolParameters};

/// The core Tool trait.
///
/// Names must be stable across restarts — they are persisted inside
/// `tool_calls` records in session logs.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "shell", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> ToolParameters;

    /// Execute the tool. `args_json` is the raw argument text as emitted by
    /// the model; the tool is responsible for parsing it.
    async fn execute(
        &self,
        cancel: CancellationToken,
        args_json: &str,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a `ToolDefinition` for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools — the dispatcher.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Look up and execute tools when the model requests them
///
/// Registration happens at startup; lookups are concurrent-read safe.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().unwrap().insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<String> {
        self.tools.read().unwrap().keys().cloned().collect()
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name. Unknown names are an error; the argument JSON
    /// is handed to the tool untouched.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        name: &str,
        args_json: &str,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(cancel, args_json).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
