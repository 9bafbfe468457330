//! Errors raised while parsing or running action code.

use codeact_core::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError (line {line}): {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },

    #[error("Security violation: {0}")]
    Security(String),

    #[error("User denied confirmation for {tool}")]
    ConfirmationDenied { tool: String },

    #[error("Tool {tool} timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("line {line}: {message}")]
    LimitExceeded { line: usize, message: String },
}

impl ScriptError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    /// A runtime error whose line is filled in by the enclosing statement.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            line: 0,
            message: message.into(),
        }
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::LimitExceeded {
            line: 0,
            message: message.into(),
        }
    }

    /// Attach a source line if none is set yet.
    pub fn at_line(mut self, at: usize) -> Self {
        match &mut self {
            Self::Runtime { line, .. } | Self::LimitExceeded { line, .. } if *line == 0 => {
                *line = at;
            }
            _ => {}
        }
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Syntax { .. } => ErrorCategory::SyntaxError,
            Self::Runtime { .. } => ErrorCategory::RuntimeError,
            Self::Security(_) => ErrorCategory::SecurityViolation,
            Self::ConfirmationDenied { .. } => ErrorCategory::ConfirmationDenied,
            Self::ToolTimeout { .. } | Self::LimitExceeded { .. } => ErrorCategory::Timeout,
        }
    }
}

impl From<String> for ScriptError {
    fn from(message: String) -> Self {
        Self::runtime(message)
    }
}

impl From<&str> for ScriptError {
    fn from(message: &str) -> Self {
        Self::runtime(message)
    }
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_set_once() {
        let err = ScriptError::runtime("boom").at_line(3).at_line(7);
        assert_eq!(err.to_string(), "line 3: boom");
    }

    #[test]
    fn categories() {
        assert_eq!(ScriptError::syntax(1, "x").category(), ErrorCategory::SyntaxError);
        assert_eq!(ScriptError::limit("x").category(), ErrorCategory::Timeout);
        assert_eq!(
            ScriptError::ConfirmationDenied { tool: "shell.run".into() }.category(),
            ErrorCategory::ConfirmationDenied
        );
    }
}
