//! Lifecycle events and the observer bus.
//!
//! The agent and executor publish an [`AgentEvent`] at every transition.
//! Observers are either synchronous callbacks ([`EventObserver`]) or async
//! subscribers reading a `tokio::sync::broadcast` channel. A failing observer
//! never affects the component that emitted the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::execution::{ErrorCategory, ExecutionStatus, TaskStatus};

/// All lifecycle events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TaskStarted {
        task_id: String,
        task: String,
        max_iterations: u32,
        timestamp: DateTime<Utc>,
    },

    StepStarted {
        task_id: String,
        step: u32,
        timestamp: DateTime<Utc>,
    },

    /// The reasoner produced the thought and action for a step.
    ActionGenerated {
        task_id: String,
        step: u32,
        thought: String,
        action: String,
    },

    StepCompleted {
        task_id: String,
        step: u32,
        execution_status: ExecutionStatus,
        task_status: TaskStatus,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ToolExecutionStarted {
        tool: String,
        arguments: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    ToolExecutionCompleted {
        tool: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ConfirmationRequested {
        tool: String,
        message: String,
    },

    ConfirmationResolved {
        tool: String,
        approved: bool,
    },

    /// A token streamed from the language model.
    StreamToken { token: String },

    TaskCompleted {
        task_id: String,
        steps: u32,
        timestamp: DateTime<Utc>,
    },

    TaskAborted {
        task_id: String,
        steps: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    IterationLimitReached {
        task_id: String,
        steps: u32,
        timestamp: DateTime<Utc>,
    },

    /// The reasoner failed after exhausting its retries.
    ReasoningError {
        task_id: String,
        step: u32,
        message: String,
    },

    /// An action failed; `category` tells why.
    ExecutionError {
        task_id: String,
        step: u32,
        category: ErrorCategory,
        message: String,
    },
}

impl AgentEvent {
    /// Stable event-type name, e.g. `"task_start"` or `"error_security"`.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TaskStarted { .. } => "task_start",
            AgentEvent::StepStarted { .. } => "step_start",
            AgentEvent::ActionGenerated { .. } => "action_generated",
            AgentEvent::StepCompleted { .. } => "step_end",
            AgentEvent::ToolExecutionStarted { .. } => "tool_execution_start",
            AgentEvent::ToolExecutionCompleted { .. } => "tool_execution_end",
            AgentEvent::ConfirmationRequested { .. } => "confirmation_request",
            AgentEvent::ConfirmationResolved { .. } => "confirmation_resolved",
            AgentEvent::StreamToken { .. } => "stream_token",
            AgentEvent::TaskCompleted { .. } => "task_complete",
            AgentEvent::TaskAborted { .. } => "task_aborted",
            AgentEvent::IterationLimitReached { .. } => "task_iteration_limit",
            AgentEvent::ReasoningError { .. } => "error_reasoning",
            AgentEvent::ExecutionError { category, .. } => match category {
                ErrorCategory::SecurityViolation => "error_security",
                ErrorCategory::Timeout => "error_timeout",
                ErrorCategory::ConfirmationDenied => "error_confirmation_denied",
                ErrorCategory::SyntaxError | ErrorCategory::RuntimeError => "error_execution",
            },
        }
    }
}

/// Error an observer may report; logged by the bus and otherwise ignored.
#[derive(Debug, thiserror::Error)]
#[error("observer failed: {0}")]
pub struct ObserverError(pub String);

/// A synchronous event callback.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &AgentEvent) -> Result<(), ObserverError>;
}

impl<F> EventObserver for F
where
    F: Fn(&AgentEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Logs every event through `tracing`.
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_event(&self, event: &AgentEvent) -> Result<(), ObserverError> {
        match event {
            AgentEvent::StreamToken { .. } => {
                tracing::trace!(kind = event.kind(), "agent event");
            }
            AgentEvent::ReasoningError { message, .. } => {
                tracing::error!(kind = event.kind(), %message, "agent event");
            }
            AgentEvent::ExecutionError { message, .. } | AgentEvent::TaskAborted { reason: message, .. } => {
                tracing::warn!(kind = event.kind(), %message, "agent event");
            }
            _ => tracing::debug!(kind = event.kind(), ?event, "agent event"),
        }
        Ok(())
    }
}

/// Fan-out event bus.
///
/// `emit` first runs the registered observers in registration order, then
/// publishes to broadcast subscribers. Observer errors and panics are caught
/// and logged.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl EventBus {
    /// Create a new event bus with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a synchronous observer.
    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Publish an event to all observers and subscribers.
    pub fn emit(&self, event: AgentEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(kind = event.kind(), error = %e, "Event observer failed"),
                Err(_) => tracing::error!(kind = event.kind(), "Event observer panicked"),
            }
        }

        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
