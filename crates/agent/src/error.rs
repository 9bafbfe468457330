//! Errors that end a task early.
//!
//! Action failures are not errors at this level: they are recorded as steps
//! and shown to the model. Only reasoning failures, repeated security
//! violations and bad configuration reach the caller.

use codeact_config::ConfigError;
use thiserror::Error;

use crate::outcome::TaskOutcome;
use crate::reasoner::ReasoningError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The model could not produce a usable action within the retry budget.
    #[error("reasoning failed at step {step}: {source}")]
    ReasoningFailure {
        /// 0 for conversational replies
        step: u32,
        #[source]
        source: ReasoningError,
        /// The task as far as it got
        partial: Option<Box<TaskOutcome>>,
    },

    #[error("task aborted after {violations} security violation(s): {message}")]
    SecurityViolation {
        violations: u32,
        message: String,
        partial: Box<TaskOutcome>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AgentError {
    /// The steps taken before the task failed, if it got that far.
    pub fn partial(&self) -> Option<&TaskOutcome> {
        match self {
            AgentError::ReasoningFailure { partial, .. } => partial.as_deref(),
            AgentError::SecurityViolation { partial, .. } => Some(partial),
            AgentError::Configuration(_) => None,
        }
    }
}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        AgentError::Configuration(e.to_string())
    }
}

impl From<AgentError> for codeact_core::Error {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Configuration(message) => codeact_core::Error::Config { message },
            other => codeact_core::Error::Internal(other.to_string()),
        }
    }
}
