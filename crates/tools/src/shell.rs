//! `shell.run`: execute allow-listed system commands.
//!
//! Supports command allowlisting, an optional working directory, and is
//! killed if the executor's timeout drops the call.

use async_trait::async_trait;
use codeact_core::{ArgType, Tool, ToolArgument, ToolContext, ToolDefinition, ToolError, ToolResult};
use codeact_security::{AllowlistPolicy, CheckResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Common read-only commands.
pub const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "echo", "pwd", "date", "whoami", "wc", "grep", "find", "which",
    "uname", "git",
];

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    allowed_commands: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self {
            allowed_commands,
            working_dir: None,
        }
    }

    /// A shell tool limited to [`SAFE_COMMANDS`].
    pub fn safe() -> Self {
        Self::new(SAFE_COMMANDS.iter().map(|c| c.to_string()).collect())
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::builder("run")
            .toolbox("shell")
            .description(format!(
                "Run a single command (no pipes or chaining) and return its combined output. \
                 Allowed programs: {}.",
                self.allowed_commands.join(", ")
            ))
            .argument(ToolArgument::required("command", ArgType::String, "The command line to run"))
            .returns("string")
            .confirmation("The agent wants to run a shell command. Allow?")
            .timeout(Duration::from_secs(30))
            .build()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _context: Option<&ToolContext>,
    ) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if let CheckResult::Denied { reason, .. } =
            AllowlistPolicy::check_command(command, &self.allowed_commands)
        {
            return Err(ToolError::PermissionDenied {
                tool_name: "shell.run".into(),
                reason,
            });
        }

        debug!(command = %command, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "shell.run".into(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            return Err(ToolError::ExecutionFailed {
                tool_name: "shell.run".into(),
                reason: format!("exit code {code}: {}", stderr.trim()),
            });
        }

        let text = if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\n[stderr]: {stderr}")
        };
        Ok(ToolResult::ok(text.trim().to_string()))
    }
}
