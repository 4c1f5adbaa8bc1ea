//! Shell tool — execute system commands with a timeout and an output cap.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use oxpilot_core::error::ToolError;
use oxpilot_core::provider::{ToolParameters, ToolProperty};
use oxpilot_core::tool::Tool;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ShellTool {
    timeout: Duration,
    max_output: usize,
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
}

impl ShellTool {
    pub fn new(timeout_secs: u64, max_output: usize) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.max(1)),
            max_output: max_output.max(256),
        }
    }

    fn cap(&self, text: String) -> String {
        if text.len() <= self.max_output {
            return text;
        }
        let mut end = self.max_output;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n[output truncated]", &text[..end])
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Use this for running programs, git operations, searching, and anything not covered by the file tools."
    }

    fn parameters_schema(&self) -> ToolParameters {
        ToolParameters::default()
            .property("command", ToolProperty::string("The shell command to execute"))
            .require("command")
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        args_json: &str,
    ) -> Result<String, ToolError> {
        let args: ShellArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        debug!(command = %args.command, "executing shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "shell".into(),
                reason: e.to_string(),
            })?;

        let wait = child.wait_with_output();
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "shell".into(),
                    reason: "cancelled".into(),
                });
            }
            result = tokio::time::timeout(self.timeout, wait) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ToolError::ExecutionFailed {
                        tool_name: "shell".into(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool_name: "shell".into(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let text = if output.status.success() {
            if stderr.trim().is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %args.command, exit_code = code, "command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        Ok(self.cap(text.trim().to_string()))
    }
}
