//! Scratchpad for the steps of a single task.
//!
//! Holds the system prompt, the task description and the ordered list of
//! steps taken so far. Working memory is:
//!
//! - **Task-scoped**: reset at the start of every task
//! - **Append-only**: recorded steps are never modified
//! - **Renderable**: produces a token-bounded history for the next prompt

use codeact_core::Step;
use serde::{Deserialize, Serialize};

use crate::token::estimate_tokens;

/// The agent's scratchpad within a single task lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    system_prompt: String,
    task_description: String,
    steps: Vec<Step>,
}

impl WorkingMemory {
    /// Create a working memory for a new task.
    pub fn new(system_prompt: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            task_description: task_description.into(),
            steps: Vec::new(),
        }
    }

    /// Forget everything and start a new task.
    pub fn reset(&mut self, system_prompt: impl Into<String>, task_description: impl Into<String>) {
        *self = Self::new(system_prompt, task_description);
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    // ── Steps ──

    /// Append a step.
    pub fn add(&mut self, step: Step) {
        debug_assert_eq!(
            step.number as usize,
            self.steps.len() + 1,
            "steps must be numbered contiguously from 1"
        );
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// The number the next step will carry.
    pub fn next_step_number(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Consume the memory, keeping only the steps.
    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    // ── Rendering ──

    /// Render the most recent steps that fit in `max_tokens`, oldest first.
    ///
    /// Steps are taken newest-first and only whole steps are kept; the first
    /// step that does not fit ends the walk, so the result is always a
    /// contiguous suffix of the history.
    pub fn format_history(&self, max_tokens: usize) -> String {
        let mut used = 0;
        let mut kept: Vec<String> = Vec::new();

        for step in self.steps.iter().rev() {
            let rendered = step.render();
            let cost = estimate_tokens(&rendered);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            kept.push(rendered);
        }

        if kept.len() < self.steps.len() {
            tracing::debug!(
                kept = kept.len(),
                dropped = self.steps.len() - kept.len(),
                "History truncated to token budget"
            );
        }

        kept.reverse();
        kept.join("\n")
    }

    /// System prompt, task description and the complete step history.
    pub fn get_full_context(&self) -> String {
        let history: Vec<String> = self.steps.iter().map(Step::render).collect();
        let mut out = String::new();
        out.push_str(&self.system_prompt);
        out.push_str("\n\n## Task\n");
        out.push_str(&self.task_description);
        out.push('\n');
        if !history.is_empty() {
            out.push_str("\n## History\n");
            out.push_str(&history.join("\n"));
        }
        out
    }
}
