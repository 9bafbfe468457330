//! What a task ended with.

use codeact_core::{ContextVariables, Step, value_to_text};
use serde::{Deserialize, Serialize};

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Aborted,
    /// The step budget ran out before the task finished. Not an error.
    IterationLimitReached,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Aborted => "aborted",
            OutcomeStatus::IterationLimitReached => "iteration_limit_reached",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of solving one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: OutcomeStatus,
    /// Result of the last step, the best available answer for any status.
    pub answer: serde_json::Value,
    /// Why the task did not complete. `None` when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub steps: Vec<Step>,
    /// Context variables at the end of the task
    #[serde(default)]
    pub variables: ContextVariables,
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    pub fn answer_text(&self) -> String {
        value_to_text(&self.answer)
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// One line for the conversation log.
    pub fn summary(&self) -> String {
        match (self.status, &self.reason) {
            (OutcomeStatus::Completed, _) => self.answer_text(),
            (status, Some(reason)) if self.answer.is_null() => format!("[{status}] {reason}"),
            (status, Some(reason)) => {
                format!("[{status}] {reason} (last result: {})", self.answer_text())
            }
            (status, None) => format!("[{status}] {}", self.answer_text()),
        }
    }
}
