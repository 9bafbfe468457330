//! `files.read`: read file contents inside the workspace.

use async_trait::async_trait;
use codeact_core::{ArgType, Tool, ToolArgument, ToolContext, ToolDefinition, ToolError, ToolResult};
use codeact_security::PathPolicy;

const DEFAULT_MAX_CHARS: u64 = 100_000;

pub struct FileReadTool {
    policy: PathPolicy,
}

impl FileReadTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new(PathPolicy::unrestricted())
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::builder("read")
            .toolbox("files")
            .description("Read a UTF-8 text file and return its contents.")
            .argument(ToolArgument::required("path", ArgType::String, "The file path to read"))
            .argument(ToolArgument::optional(
                "max_chars",
                ArgType::Integer,
                serde_json::json!(DEFAULT_MAX_CHARS),
                "Truncate the returned text to this many characters",
            ))
            .returns("string")
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
        let max_chars = arguments["max_chars"].as_u64().unwrap_or(DEFAULT_MAX_CHARS) as usize;

        let resolved = self
            .policy
            .resolve(path)
            .map_err(|e| ToolError::PermissionDenied {
                tool_name: "files.read".into(),
                reason: e.to_string(),
            })?;

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "files.read".into(),
                reason: format!("Failed to read {path}: {e}"),
            })?;

        if content.chars().count() > max_chars {
            let truncated: String = content.chars().take(max_chars).collect();
            tracing::debug!(path = %path, max_chars, "File content truncated");
            return Ok(ToolResult::ok(truncated));
        }
        Ok(ToolResult::ok(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_valid() {
        let def = FileReadTool::default().definition();
        assert_eq!(def.qualified_name(), "files.read");
        assert!(def.validate().is_ok());
        assert!(def.argument("path").unwrap().required);
        assert!(!def.needs_confirmation());
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "Hello, world!\n").unwrap();

        let tool = FileReadTool::new(PathPolicy::workspace(dir.path()));
        let result = tool
            .execute(serde_json::json!({"path": "test.txt"}), None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.into_value(), serde_json::json!("Hello, world!\n"));
    }

    #[tokio::test]
    async fn long_content_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "abcdef").unwrap();

        let tool = FileReadTool::new(PathPolicy::workspace(dir.path()));
        let result = tool
            .execute(serde_json::json!({"path": "big.txt", "max_chars": 3}), None)
            .await
            .unwrap();
        assert_eq!(result.output, "abc");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(PathPolicy::workspace(dir.path()));
        let result = tool
            .execute(serde_json::json!({"path": "nope.txt"}), None)
            .await;
        match result {
            Err(ToolError::ExecutionFailed { reason, .. }) => assert!(reason.contains("nope.txt")),
            other => panic!("Expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let result = FileReadTool::default().execute(serde_json::json!({}), None).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn path_traversal_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(PathPolicy::workspace(dir.path()));
        let result = tool
            .execute(serde_json::json!({"path": "../../../etc/passwd"}), None)
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn forbidden_path_blocked() {
        let result = FileReadTool::default()
            .execute(serde_json::json!({"path": "/etc/shadow"}), None)
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
