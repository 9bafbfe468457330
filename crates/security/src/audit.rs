//! Structured audit log of security-relevant decisions.
//!
//! Records security violations, confirmation decisions and tool executions
//! so a session can be reviewed after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Who acted, usually the task id
    pub actor: String,
    /// What was acted upon (module, tool, path, command)
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable security events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Action code imported a module outside the allowlist
    ImportBlocked { module: String },
    /// Action code referenced a forbidden built-in such as `eval`
    ForbiddenName { name: String },
    /// A tool asked for user confirmation
    Confirmation { tool_name: String },
    /// A tool was executed
    ToolExecution { tool_name: String },
    /// A tool was registered at runtime
    ToolRegistered { tool_name: String },
    /// A file tool was refused a path
    PathDenied { path: String },
    /// The shell tool was refused a command
    CommandDenied { command: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger that keeps entries in memory and forwards them to sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// A logger that writes through `tracing`.
    pub fn tracing() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        self.lock().push(entry.clone());

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    pub fn import_blocked(&self, actor: &str, module: &str, reason: &str) {
        self.log(
            AuditEvent::ImportBlocked {
                module: module.into(),
            },
            actor,
            module,
            AuditOutcome::Denied,
            Some(reason.into()),
        );
    }

    pub fn forbidden_name(&self, actor: &str, name: &str) {
        self.log(
            AuditEvent::ForbiddenName { name: name.into() },
            actor,
            name,
            AuditOutcome::Denied,
            None,
        );
    }

    pub fn tool_registered(&self, actor: &str, tool_name: &str) {
        self.log(
            AuditEvent::ToolRegistered {
                tool_name: tool_name.into(),
            },
            actor,
            tool_name,
            AuditOutcome::Success,
            None,
        );
    }

    pub fn confirmation(&self, actor: &str, tool_name: &str, approved: bool) {
        self.log(
            AuditEvent::Confirmation {
                tool_name: tool_name.into(),
            },
            actor,
            tool_name,
            if approved {
                AuditOutcome::Success
            } else {
                AuditOutcome::Denied
            },
            None,
        );
    }

    pub fn tool_execution(&self, actor: &str, tool_name: &str, success: bool, details: Option<String>) {
        self.log(
            AuditEvent::ToolExecution {
                tool_name: tool_name.into(),
            },
            actor,
            tool_name,
            if success {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            },
            details,
        );
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A tracing-based audit sink.
///
/// Denials are logged at `warn`, everything else at `info`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        if entry.outcome == AuditOutcome::Denied {
            tracing::warn!(
                event = ?entry.event,
                actor = %entry.actor,
                target = %entry.target,
                details = ?entry.details,
                "AUDIT denied"
            );
        } else {
            tracing::info!(
                event = ?entry.event,
                actor = %entry.actor,
                target = %entry.target,
                outcome = ?entry.outcome,
                details = ?entry.details,
                "AUDIT"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn log_and_retrieve_entries() {
        let logger = AuditLogger::new();
        logger.import_blocked("task-1", "os", "not in allowlist");
        logger.confirmation("task-1", "files.write", true);

        assert_eq!(logger.count(), 2);
        let entries = logger.entries();
        assert_eq!(
            entries[0].event,
            AuditEvent::ImportBlocked { module: "os".into() }
        );
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert_eq!(entries[1].target, "files.write");
        assert_eq!(entries[1].outcome, AuditOutcome::Success);
    }

    #[test]
    fn filter_by_outcome() {
        let logger = AuditLogger::new();
        logger.confirmation("t", "shell.run", false);
        logger.tool_execution("t", "calculator.calculate", true, None);
        logger.tool_execution("t", "files.read", false, Some("not found".into()));

        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Denied).len(), 1);
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Success).len(), 1);
        let failures = logger.entries_by_outcome(&AuditOutcome::Failure);
        assert_eq!(failures[0].details.as_deref(), Some("not found"));
    }

    #[test]
    fn clear_entries() {
        let logger = AuditLogger::tracing();
        logger.tool_execution("t", "calculator.calculate", true, None);
        assert_eq!(logger.count(), 1);
        logger.clear();
        assert_eq!(logger.count(), 0);
    }

    #[test]
    fn audit_entry_serialization() {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event: AuditEvent::PathDenied {
                path: "/etc/passwd".into(),
            },
            actor: "task-9".into(),
            target: "files.read".into(),
            outcome: AuditOutcome::Denied,
            details: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "path_denied");
        let back: AuditEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.actor, "task-9");
        assert_eq!(back.outcome, AuditOutcome::Denied);
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.target.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);

        logger.log(
            AuditEvent::CommandDenied {
                command: "rm -rf /".into(),
            },
            "task-2",
            "shell.run",
            AuditOutcome::Denied,
            None,
        );

        assert_eq!(*received.lock().unwrap(), vec!["shell.run".to_string()]);
    }

    #[test]
    fn debug_format() {
        let logger = AuditLogger::default();
        let debug_str = format!("{logger:?}");
        assert!(debug_str.contains("AuditLogger"));
        assert!(debug_str.contains("entry_count"));
    }
}
