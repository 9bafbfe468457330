//! Execution results and reasoning steps.
//!
//! An [`ExecutionResult`] describes what happened when one action ran; a
//! [`Step`] pairs it with the thought and code that produced it. Both are
//! plain values: once a step is recorded it is never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State carried between the steps of one task.
///
/// Ordered by key so prompts rendered from it are deterministic.
pub type ContextVariables = serde_json::Map<String, serde_json::Value>;

/// Whether the action itself ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// What the action reported about the task as a whole.
///
/// Independent of [`ExecutionStatus`]: a successful action may leave the
/// task in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    InProgress,
    Completed,
    Aborted,
}

impl TaskStatus {
    /// Parse the status names accepted from action code.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "in_progress" | "inprogress" | "continue" => Some(TaskStatus::InProgress),
            "completed" | "complete" | "done" => Some(TaskStatus::Completed),
            "aborted" | "abort" | "failed" => Some(TaskStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Aborted => "aborted",
        }
    }
}

/// Why an action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The action could not be parsed.
    SyntaxError,
    /// The action raised while running.
    RuntimeError,
    /// The action tried a disallowed import or operation; nothing ran.
    SecurityViolation,
    /// The action (or one of its tool calls) exceeded its time limit.
    Timeout,
    /// The user declined a tool call that required confirmation.
    ConfirmationDenied,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::RuntimeError => "runtime_error",
            ErrorCategory::SecurityViolation => "security_violation",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ConfirmationDenied => "confirmation_denied",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of running one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_status: ExecutionStatus,
    pub task_status: TaskStatus,
    /// The value the action produced (`null` when it produced nothing).
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Hint from the action about what to do next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    /// Text printed by the action.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    pub elapsed_ms: u64,
    /// Variables the action assigned. Empty unless the action succeeded.
    #[serde(default)]
    pub local_variables: ContextVariables,
}

impl ExecutionResult {
    /// A successful execution.
    pub fn success(result: serde_json::Value, task_status: TaskStatus) -> Self {
        Self {
            execution_status: ExecutionStatus::Success,
            task_status,
            result,
            error: None,
            error_category: None,
            next_step: None,
            output: String::new(),
            elapsed_ms: 0,
            local_variables: ContextVariables::new(),
        }
    }

    /// A failed execution; the task stays in progress so the next step can react.
    pub fn failure(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            execution_status: ExecutionStatus::Error,
            task_status: TaskStatus::InProgress,
            result: serde_json::Value::Null,
            error: Some(message.into()),
            error_category: Some(category),
            next_step: None,
            output: String::new(),
            elapsed_ms: 0,
            local_variables: ContextVariables::new(),
        }
    }

    pub fn with_elapsed(mut self, elapsed: std::time::Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.execution_status == ExecutionStatus::Success
    }

    pub fn is_category(&self, category: ErrorCategory) -> bool {
        self.error_category == Some(category)
    }

    /// The result as display text; strings are shown without quotes.
    pub fn result_text(&self) -> String {
        value_to_text(&self.result)
    }
}

/// Render a JSON value the way an action's `str()` would.
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".into(),
        other => other.to_string(),
    }
}

/// One reasoning → action → observation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based, contiguous within a task.
    pub number: u32,
    pub thought: String,
    pub action: String,
    pub result: ExecutionResult,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(number: u32, thought: impl Into<String>, action: impl Into<String>, result: ExecutionResult) -> Self {
        Self {
            number,
            thought: thought.into(),
            action: action.into(),
            result,
            timestamp: Utc::now(),
        }
    }

    /// Render the step as it appears in the reasoning history.
    pub fn render(&self) -> String {
        let r = &self.result;
        let mut out = format!("=== Step {} ===\n", self.number);
        out.push_str(&format!("Thought:\n{}\n", self.thought.trim()));
        out.push_str(&format!("Action:\n```\n{}\n```\n", self.action.trim()));
        out.push_str(&format!(
            "Result: execution={} task={}\n",
            match r.execution_status {
                ExecutionStatus::Success => "success",
                ExecutionStatus::Error => "error",
            },
            r.task_status.as_str()
        ));
        if !r.result.is_null() {
            out.push_str(&format!("Value: {}\n", value_to_text(&r.result)));
        }
        if !r.output.is_empty() {
            out.push_str(&format!("Printed:\n{}\n", r.output.trim_end()));
        }
        if let Some(err) = &r.error {
            let category = r.error_category.map(|c| c.as_str()).unwrap_or("error");
            out.push_str(&format!("Error ({category}): {err}\n"));
        }
        if let Some(next) = &r.next_step {
            out.push_str(&format!("Next step: {next}\n"));
        }
        if !r.local_variables.is_empty() {
            let names: Vec<&str> = r.local_variables.keys().map(|k| k.as_str()).collect();
            out.push_str(&format!("Variables set: {}\n", names.join(", ")));
        }
        out
    }
}
