//! Read a file, optionally windowed by line offset and limit.

use async_trait::async_trait;
use oxpilot_core::error::ToolError;
use oxpilot_core::provider::{ToolParameters, ToolProperty};
use oxpilot_core::tool::Tool;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub struct FileReadTool {
    max_lines: usize,
}

#[derive(Deserialize)]
struct FileReadArgs {
    path: String,
    /// 1-based first line to return.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

impl FileReadTool {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Large files are windowed; use offset/limit to page through them."
    }

    fn parameters_schema(&self) -> ToolParameters {
        ToolParameters::default()
            .property("path", ToolProperty::string("Path of the file to read"))
            .property("offset", ToolProperty::integer("1-based first line to return"))
            .property("limit", ToolProperty::integer("Maximum number of lines to return"))
            .require("path")
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        args_json: &str,
    ) -> Result<String, ToolError> {
        let args: FileReadArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let content =
            tokio::fs::read_to_string(&args.path)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "read_file".into(),
                    reason: format!("{}: {e}", args.path),
                })?;

        let lines: Vec<&str> = content.lines().collect();
        let start = args.offset.unwrap_or(1).max(1) - 1;
        if start >= lines.len() && !lines.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "offset {} is past the end of the file ({} lines)",
                start + 1,
                lines.len()
            )));
        }
        let limit = args.limit.unwrap_or(self.max_lines).min(self.max_lines);
        let end = (start + limit).min(lines.len());

        let mut out = lines[start..end].join("\n");
        if end < lines.len() {
            out.push_str(&format!(
                "\n[showing lines {}-{} of {}]",
                start + 1,
                end,
                lines.len()
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn read(tool: &FileReadTool, args: &str) -> Result<String, ToolError> {
        tool.execute(CancellationToken::new(), args).await
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let tool = FileReadTool::new(500);
        let out = read(&tool, &format!(r#"{{"path":"{}"}}"#, path.display()))
            .await
            .unwrap();
        assert_eq!(out, "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn windows_with_offset_and_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let body: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let tool = FileReadTool::new(500);
        let out = read(
            &tool,
            &format!(r#"{{"path":"{}","offset":3,"limit":2}}"#, path.display()),
        )
        .await
        .unwrap();
        assert!(out.starts_with("line 3\nline 4"));
        assert!(out.contains("[showing lines 3-4 of 10]"));
    }

    #[tokio::test]
    async fn caps_at_max_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let body: String = (1..=50).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let tool = FileReadTool::new(10);
        let out = read(&tool, &format!(r#"{{"path":"{}"}}"#, path.display()))
            .await
            .unwrap();
        assert!(out.contains("[showing lines 1-10 of 50]"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let tool = FileReadTool::new(500);
        let err = read(&tool, r#"{"path":"/no/such/file"}"#).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
