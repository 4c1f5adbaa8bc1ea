//! List a directory, directories suffixed with `/`.

use async_trait::async_trait;
use oxpilot_core::error::ToolError;
use oxpilot_core::provider::{ToolParameters, ToolProperty};
use oxpilot_core::tool::Tool;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub struct ListDirTool;

#[derive(Deserialize)]
struct ListDirArgs {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> ToolParameters {
        ToolParameters::default().property(
            "path",
            ToolProperty::string("Directory to list; defaults to the current directory"),
        )
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        args_json: &str,
    ) -> Result<String, ToolError> {
        let args: ListDirArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let path = args.path.unwrap_or_else(|| ".".to_string());

        let mut read_dir =
            tokio::fs::read_dir(&path)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "list_dir".into(),
                    reason: format!("{path}: {e}"),
                })?;

        let mut names = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        Ok(names.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        let args = serde_json::json!({"path": dir.path()}).to_string();
        let out = ListDirTool
            .execute(CancellationToken::new(), &args)
            .await
            .unwrap();
        assert_eq!(out, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = TempDir::new().unwrap();
        let args = serde_json::json!({"path": dir.path()}).to_string();
        let out = ListDirTool
            .execute(CancellationToken::new(), &args)
            .await
            .unwrap();
        assert!(out.contains("is empty"));
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let err = ListDirTool
            .execute(CancellationToken::new(), r#"{"path":"/no/such/dir"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
