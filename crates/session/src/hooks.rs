//! External prompt/response hooks.
//!
//! A hook is a shell command line that receives text on stdin and may answer
//! on stdout. Hooks never see internal state and a failing hook never blocks
//! the turn — callers surface hook errors as events and move on.

use std::process::Stdio;
use std::time::Duration;

use oxpilot_core::error::SessionError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Run a hook command, feeding `input` on stdin and returning trimmed stdout.
///
/// An empty command is a no-op returning an empty string. A zero timeout
/// falls back to 10 seconds. On timeout the child is killed.
pub async fn run_hook(
    command: &str,
    input: &str,
    timeout: Duration,
) -> Result<String, SessionError> {
    let command = command.trim();
    if command.is_empty() {
        return Ok(String::new());
    }
    let timeout = if timeout.is_zero() {
        Duration::from_secs(10)
    } else {
        timeout
    };

    debug!(command, "running hook");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        drop(stdin);
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| SessionError::HookFailed {
            message: format!("hook timed out after {}s", timeout.as_secs()),
        })??;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("hook exited with {}", output.status)
        } else {
            format!("hook exited with {}: {stderr}", output.status)
        };
        return Err(SessionError::HookFailed { message });
    }

    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_is_noop() {
        let out = run_hook("", "input", Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn stdout_replaces_input() {
        let out = run_hook("tr a-z A-Z", "hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "HELLO");
    }

    #[tokio::test]
    async fn failing_hook_reports_stderr() {
        let err = run_hook("echo nope >&2; exit 3", "x", Duration::from_secs(5))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nope"), "got: {msg}");
    }

    #[tokio::test]
    async fn hung_hook_times_out() {
        let err = run_hook("sleep 30", "x", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
