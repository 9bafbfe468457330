//! `files.write`: write or create files inside the workspace.
//!
//! Writing changes the user's disk, so the tool always asks for
//! confirmation unless an override turns that off.

use async_trait::async_trait;
use codeact_core::{ArgType, Tool, ToolArgument, ToolContext, ToolDefinition, ToolError, ToolResult};
use codeact_security::PathPolicy;
use tokio::io::AsyncWriteExt;

pub struct FileWriteTool {
    policy: PathPolicy,
}

impl FileWriteTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new(PathPolicy::unrestricted())
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::builder("write")
            .toolbox("files")
            .description(
                "Write text to a file, creating it (and parent directories) if needed. \
                 Overwrites unless append is true. Returns the number of bytes written.",
            )
            .argument(ToolArgument::required("path", ArgType::String, "The file path to write to"))
            .argument(ToolArgument::required("content", ArgType::String, "The content to write"))
            .argument(ToolArgument::optional(
                "append",
                ArgType::Boolean,
                serde_json::json!(false),
                "Append instead of overwriting",
            ))
            .returns("integer")
            .confirmation("The agent wants to write a file on disk. Allow?")
            .build()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _context: Option<&ToolContext>,
    ) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;
        let append = arguments["append"].as_bool().unwrap_or(false);

        let resolved = self
            .policy
            .resolve(path)
            .map_err(|e| ToolError::PermissionDenied {
                tool_name: "files.write".into(),
                reason: e.to_string(),
            })?;

        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: "files.write".into(),
            reason: format!("Failed to write {path}: {e}"),
        };

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&resolved)
            .await
            .map_err(failed)?;
        file.write_all(content.as_bytes()).await.map_err(failed)?;
        file.flush().await.map_err(failed)?;

        let written = content.len();
        tracing::debug!(path = %resolved.display(), bytes = written, append, "File written");
        Ok(ToolResult::with_data(
            format!("Wrote {written} bytes to {path}"),
            serde_json::json!(written),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_requires_confirmation() {
        let def = FileWriteTool::default().definition();
        assert_eq!(def.qualified_name(), "files.write");
        assert!(def.needs_confirmation());
        assert!(def.validate().is_ok());
        let names: Vec<&str> = def.arguments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["path", "content", "append"]);
    }

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(PathPolicy::workspace(dir.path()));
        let result = tool
            .execute(
                serde_json::json!({"path": "output.txt", "content": "Hello from test!"}),
                None,
            )
            .await
            .unwrap();

        assert!(result.output.contains("16 bytes"));
        assert_eq!(result.into_value(), serde_json::json!(16));
        let content = std::fs::read_to_string(dir.path().join("output.txt")).unwrap();
        assert_eq!(content, "Hello from test!");
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(PathPolicy::workspace(dir.path()));
        tool.execute(
            serde_json::json!({"path": "nested/dir/file.txt", "content": "nested content"}),
            None,
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("nested/dir/file.txt")).unwrap();
        assert_eq!(content, "nested content");
    }

    #[tokio::test]
    async fn overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log.txt"), "old content").unwrap();
        let tool = FileWriteTool::new(PathPolicy::workspace(dir.path()));

        tool.execute(serde_json::json!({"path": "log.txt", "content": "new"}), None)
            .await
            .unwrap();
        tool.execute(
            serde_json::json!({"path": "log.txt", "content": "+more", "append": true}),
            None,
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(content, "new+more");
    }

    #[tokio::test]
    async fn missing_content_argument() {
        let result = FileWriteTool::default()
            .execute(serde_json::json!({"path": "/tmp/test.txt"}), None)
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn escape_from_workspace_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(PathPolicy::workspace(dir.path()));
        for path in ["../../../etc/crontab", "/etc/shadow"] {
            let result = tool
                .execute(serde_json::json!({"path": path, "content": "malicious"}), None)
                .await;
            assert!(matches!(result, Err(ToolError::PermissionDenied { .. })), "{path}");
        }
    }
}
