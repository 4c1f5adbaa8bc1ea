//! Create or overwrite a file, creating parent directories as needed.

use async_trait::async_trait;
use oxpilot_core::error::ToolError;
use oxpilot_core::provider::{ToolParameters, ToolProperty};
use oxpilot_core::tool::Tool;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct FileWriteTool;

#[derive(Deserialize)]
struct FileWriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and any parent directories) if needed. Overwrites existing content."
    }

    fn parameters_schema(&self) -> ToolParameters {
        ToolParameters::default()
            .property("path", ToolProperty::string("Path of the file to write"))
            .property("content", ToolProperty::string("The full file content"))
            .require("path")
            .require("content")
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        args_json: &str,
    ) -> Result<String, ToolError> {
        let args: FileWriteArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if let Some(parent) = std::path::Path::new(&args.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: "write_file".into(),
                        reason: format!("{}: {e}", parent.display()),
                    })?;
            }
        }

        tokio::fs::write(&args.path, &args.content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "write_file".into(),
                reason: format!("{}: {e}", args.path),
            })?;

        debug!(path = %args.path, bytes = args.content.len(), "wrote file");
        Ok(format!("wrote {} bytes to {}", args.content.len(), args.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/file.txt");
        let args = serde_json::json!({"path": path, "content": "hello"}).to_string();

        let out = FileWriteTool
            .execute(CancellationToken::new(), &args)
            .await
            .unwrap();
        assert!(out.contains("5 bytes"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn overwrites_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "old").unwrap();

        let args = serde_json::json!({"path": path, "content": "new"}).to_string();
        FileWriteTool
            .execute(CancellationToken::new(), &args)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[tokio::test]
    async fn missing_content_is_invalid() {
        let err = FileWriteTool
            .execute(CancellationToken::new(), r#"{"path":"x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
