//! Error types for the oxpilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all oxpilot operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("api request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("agent is already streaming")]
    AlreadyStreaming,

    #[error("{0} is not allowed while streaming")]
    Busy(&'static str),

    #[error("model cannot be empty")]
    EmptyModel,

    #[error("entry id cannot be empty")]
    EmptyEntryId,

    #[error("entry id {0} not found")]
    EntryNotFound(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("log append failed: {message} (record buffered, will retry on save)")]
    AppendBuffered { message: String },

    #[error("hook failed: {message}")]
    HookFailed { message: String },

    #[error(transparent)]
    Agent(#[from] crate::event::AgentError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::NotFound("grep".into()));
        assert!(err.to_string().contains("grep"));
    }

    #[test]
    fn buffered_append_mentions_retry() {
        let err = SessionError::AppendBuffered {
            message: "disk full".into(),
        };
        assert!(err.to_string().contains("buffered"));
        assert!(err.to_string().contains("disk full"));
    }
}
