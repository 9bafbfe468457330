//! The agent loop: Reason → Act → Observe until the task is done.
//!
//! Each step asks the [`Reasoner`] for a thought and an action, runs the
//! action in the [`Executor`], records the step in working memory and
//! carries the action's variables into the next step. The loop ends when an
//! action completes or aborts the task, when the step budget runs out, or
//! when the caller cancels.

use std::sync::Arc;

use chrono::Utc;
use codeact_config::AgentSettings;
use codeact_core::{
    AgentEvent, ContextVariables, ErrorCategory, EventBus, Provider, Step, TaskStatus, ToolError,
    ToolRegistry,
};
use codeact_memory::{ConversationMemory, WorkingMemory};
use codeact_providers::OpenAiCompatProvider;
use codeact_runtime::{ConfirmationHandler, Executor, install_add_tool};
use codeact_security::{AuditLogger, ModuleAllowlist};
use codeact_tools::default_registry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::outcome::{OutcomeStatus, TaskOutcome};
use crate::reasoner::{Reasoner, ReasoningInput};

/// Reason given when a task is stopped through its cancellation token.
pub const CANCELLED: &str = "cancelled";

/// The CodeAct agent.
///
/// One agent runs one task at a time; working memory and context variables
/// belong to the running task. The conversation log lives as long as the
/// agent. Hosts run several tasks concurrently with several agents sharing
/// one [`ToolRegistry`].
pub struct Agent {
    reasoner: Reasoner,
    executor: Executor,
    conversation: ConversationMemory,
    events: Arc<EventBus>,
    max_iterations: u32,
    max_history_tokens: usize,
    max_violations: u32,
}

impl Agent {
    /// Assemble an agent. It publishes on the executor's event bus, which
    /// the reasoner is switched to as well.
    pub fn new(reasoner: Reasoner, executor: Executor) -> Self {
        let events = Arc::clone(executor.events());
        let defaults = AgentSettings::default();
        Self {
            reasoner: reasoner.with_events(Arc::clone(&events)),
            executor,
            conversation: ConversationMemory::new(defaults.conversation.max_messages),
            events,
            max_iterations: defaults.max_iterations,
            max_history_tokens: defaults.max_history_tokens,
            max_violations: defaults.security.max_violations,
        }
    }

    /// Build an agent from validated settings.
    pub fn from_settings(
        settings: &AgentSettings,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        confirmation: Arc<dyn ConfirmationHandler>,
    ) -> Result<Self, AgentError> {
        settings.validate()?;

        let events = Arc::new(EventBus::default());
        let executor = Executor::from_settings(registry, &settings.executor, &settings.confirmation)
            .with_confirmation(confirmation)
            .with_events(events)
            .with_audit(Arc::new(AuditLogger::tracing()));
        let reasoner = Reasoner::from_settings(provider, settings);

        Ok(Self::new(reasoner, executor)
            .with_max_iterations(settings.max_iterations)
            .with_max_history_tokens(settings.max_history_tokens)
            .with_max_violations(settings.security.max_violations)
            .with_conversation(ConversationMemory::new(settings.conversation.max_messages)))
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_history_tokens(mut self, tokens: usize) -> Self {
        self.max_history_tokens = tokens;
        self
    }

    /// Security violations tolerated within one task before it is aborted.
    pub fn with_max_violations(mut self, max_violations: u32) -> Self {
        self.max_violations = max_violations;
        self
    }

    pub fn with_conversation(mut self, conversation: ConversationMemory) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn reasoner(&self) -> &Reasoner {
        &self.reasoner
    }

    pub fn conversation(&self) -> &ConversationMemory {
        &self.conversation
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Solve `task` within the configured step budget.
    pub async fn run(&mut self, task: &str) -> Result<TaskOutcome, AgentError> {
        self.solve(task, self.max_iterations).await
    }

    /// Solve `task` in at most `max_iterations` steps.
    pub async fn solve(&mut self, task: &str, max_iterations: u32) -> Result<TaskOutcome, AgentError> {
        self.solve_with_cancel(task, max_iterations, CancellationToken::new())
            .await
    }

    /// Solve `task`, stopping early once `cancel` fires.
    ///
    /// Cancellation drops the step in flight: neither its step record nor its
    /// variables become visible, and the outcome is aborted with reason
    /// [`CANCELLED`].
    pub async fn solve_with_cancel(
        &mut self,
        task: &str,
        max_iterations: u32,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, AgentError> {
        if max_iterations == 0 {
            return Err(AgentError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }

        let mut run = TaskRun::new(task, max_iterations);
        let conversation_history = self.conversation.format(self.conversation_budget());
        self.conversation.add_user(task);

        let allowed_modules = self.executor.allowlist().describe();
        let system_prompt = {
            let tool_docs = self.executor.tool_docs();
            self.reasoner.system_prompt(&run.input(
                &ContextVariables::new(),
                "",
                &tool_docs,
                &conversation_history,
                &allowed_modules,
            ))
        };
        let mut memory = WorkingMemory::new(system_prompt, task);

        info!(task_id = %run.task_id, max_iterations, "Task started");
        self.events.emit(AgentEvent::TaskStarted {
            task_id: run.task_id.clone(),
            task: task.to_string(),
            max_iterations,
            timestamp: Utc::now(),
        });

        while run.step_number < max_iterations {
            let step_number = run.step_number + 1;
            if cancel.is_cancelled() {
                return Ok(self.finish(run, memory, OutcomeStatus::Aborted, Some(CANCELLED.into())));
            }

            debug!(task_id = %run.task_id, step = step_number, "Step started");
            self.events.emit(AgentEvent::StepStarted {
                task_id: run.task_id.clone(),
                step: step_number,
                timestamp: Utc::now(),
            });

            // ── Reason ──
            let history_text = memory.format_history(self.max_history_tokens);
            let tool_docs = self.executor.tool_docs();
            let input = run.input(
                &run.variables,
                &history_text,
                &tool_docs,
                &conversation_history,
                &allowed_modules,
            );

            let generated = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                generated = self.reasoner.generate_action(&input) => Some(generated),
            };
            let Some(generated) = generated else {
                return Ok(self.finish(run, memory, OutcomeStatus::Aborted, Some(CANCELLED.into())));
            };
            let action = match generated {
                Ok(action) => action,
                Err(e) => {
                    error!(task_id = %run.task_id, step = step_number, error = %e, "Reasoning failed");
                    self.events.emit(AgentEvent::ReasoningError {
                        task_id: run.task_id.clone(),
                        step: step_number,
                        message: e.to_string(),
                    });
                    let partial =
                        self.finish(run, memory, OutcomeStatus::Aborted, Some(e.to_string()));
                    return Err(AgentError::ReasoningFailure {
                        step: step_number,
                        source: e,
                        partial: Some(Box::new(partial)),
                    });
                }
            };
            self.events.emit(AgentEvent::ActionGenerated {
                task_id: run.task_id.clone(),
                step: step_number,
                thought: action.thought.clone(),
                action: action.code.clone(),
            });

            // ── Act ──
            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.executor.execute(&action.code, &run.variables) => Some(result),
            };
            let Some(result) = executed else {
                return Ok(self.finish(run, memory, OutcomeStatus::Aborted, Some(CANCELLED.into())));
            };

            // ── Observe ──
            for (name, value) in &result.local_variables {
                run.variables.insert(name.clone(), value.clone());
            }
            if let (Some(category), Some(message)) = (result.error_category, &result.error) {
                if category == ErrorCategory::SecurityViolation {
                    run.violations += 1;
                    warn!(
                        task_id = %run.task_id,
                        step = step_number,
                        violations = run.violations,
                        %message,
                        "Security violation in action"
                    );
                } else {
                    debug!(task_id = %run.task_id, step = step_number, %category, %message, "Action failed");
                }
                self.events.emit(AgentEvent::ExecutionError {
                    task_id: run.task_id.clone(),
                    step: step_number,
                    category,
                    message: message.clone(),
                });
            }

            let execution_status = result.execution_status;
            let task_status = result.task_status;
            let elapsed_ms = result.elapsed_ms;
            let violation = result
                .is_category(ErrorCategory::SecurityViolation)
                .then(|| result.error.clone().unwrap_or_default());
            memory.add(Step::new(step_number, action.thought, action.code, result));
            run.step_number = step_number;

            self.events.emit(AgentEvent::StepCompleted {
                task_id: run.task_id.clone(),
                step: step_number,
                execution_status,
                task_status,
                elapsed_ms,
                timestamp: Utc::now(),
            });

            if let Some(message) = violation {
                if run.violations >= self.max_violations {
                    let violations = run.violations;
                    let reason = format!("{violations} security violation(s), last: {message}");
                    let partial = self.finish(run, memory, OutcomeStatus::Aborted, Some(reason));
                    return Err(AgentError::SecurityViolation {
                        violations,
                        message,
                        partial: Box::new(partial),
                    });
                }
            }

            match task_status {
                TaskStatus::Completed => {
                    return Ok(self.finish(run, memory, OutcomeStatus::Completed, None));
                }
                TaskStatus::Aborted => {
                    let reason = memory
                        .last_step()
                        .map(|step| step.result.result_text())
                        .unwrap_or_default();
                    return Ok(self.finish(run, memory, OutcomeStatus::Aborted, Some(reason)));
                }
                TaskStatus::InProgress => {}
            }
        }

        let reason = format!("iteration limit of {max_iterations} step(s) reached");
        Ok(self.finish(run, memory, OutcomeStatus::IterationLimitReached, Some(reason)))
    }

    /// Reply to `message` conversationally, without running actions.
    pub async fn chat(&mut self, message: &str) -> Result<String, AgentError> {
        self.conversation.add_user(message);
        let history = self.conversation.within_budget(self.conversation_budget());

        match self.reasoner.respond(&history).await {
            Ok(reply) => {
                self.conversation.add_assistant(reply.clone());
                Ok(reply)
            }
            Err(e) => {
                error!(error = %e, "Chat reply failed");
                self.events.emit(AgentEvent::ReasoningError {
                    task_id: String::new(),
                    step: 0,
                    message: e.to_string(),
                });
                Err(AgentError::ReasoningFailure {
                    step: 0,
                    source: e,
                    partial: None,
                })
            }
        }
    }

    /// Tokens of conversation history rendered into prompts.
    fn conversation_budget(&self) -> usize {
        (self.max_history_tokens / 4).max(1)
    }

    /// Close the task: publish the terminal event, log the answer to the
    /// conversation and build the outcome.
    fn finish(
        &mut self,
        run: TaskRun,
        memory: WorkingMemory,
        status: OutcomeStatus,
        reason: Option<String>,
    ) -> TaskOutcome {
        let steps = memory.into_steps();
        let step_count = steps.len() as u32;
        let answer = steps
            .last()
            .map(|step| step.result.result.clone())
            .unwrap_or(serde_json::Value::Null);

        match status {
            OutcomeStatus::Completed => {
                info!(task_id = %run.task_id, steps = step_count, "Task completed");
                self.events.emit(AgentEvent::TaskCompleted {
                    task_id: run.task_id.clone(),
                    steps: step_count,
                    timestamp: Utc::now(),
                });
            }
            OutcomeStatus::Aborted => {
                let reason = reason.clone().unwrap_or_default();
                warn!(task_id = %run.task_id, steps = step_count, %reason, "Task aborted");
                self.events.emit(AgentEvent::TaskAborted {
                    task_id: run.task_id.clone(),
                    steps: step_count,
                    reason,
                    timestamp: Utc::now(),
                });
            }
            OutcomeStatus::IterationLimitReached => {
                info!(task_id = %run.task_id, steps = step_count, "Iteration limit reached");
                self.events.emit(AgentEvent::IterationLimitReached {
                    task_id: run.task_id.clone(),
                    steps: step_count,
                    timestamp: Utc::now(),
                });
            }
        }

        let outcome = TaskOutcome {
            task_id: run.task_id,
            status,
            answer,
            reason,
            steps,
            variables: run.variables,
        };
        self.conversation.add_assistant(outcome.summary());
        outcome
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("reasoner", &self.reasoner)
            .field("executor", &self.executor)
            .field("conversation_messages", &self.conversation.len())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

/// State owned by one running task.
struct TaskRun {
    task_id: String,
    task: String,
    max_iterations: u32,
    /// Number of the last recorded step
    step_number: u32,
    variables: ContextVariables,
    violations: u32,
}

impl TaskRun {
    fn new(task: &str, max_iterations: u32) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            task: task.to_string(),
            max_iterations,
            step_number: 0,
            variables: ContextVariables::new(),
            violations: 0,
        }
    }

    fn input<'a>(
        &'a self,
        variables: &'a ContextVariables,
        history_text: &'a str,
        tool_docs: &'a str,
        conversation_history: &'a str,
        allowed_modules: &'a str,
    ) -> ReasoningInput<'a> {
        ReasoningInput {
            task_description: &self.task,
            step_number: self.step_number + 1,
            max_iterations: self.max_iterations,
            context_variables: variables,
            history_text,
            tool_docs,
            conversation_history,
            allowed_modules,
        }
    }
}

/// The built-in tools plus `agent.add_tool`, with overrides from `settings`.
pub fn standard_registry(
    settings: &AgentSettings,
    audit: Option<Arc<AuditLogger>>,
) -> Result<Arc<ToolRegistry>, ToolError> {
    let registry = Arc::new(default_registry(settings));
    let add_tool_disabled = settings
        .tool_override("agent", "add_tool")
        .is_some_and(|o| o.is_disabled());
    if !add_tool_disabled {
        let allowlist = ModuleAllowlist::new(settings.executor.allowed_modules.iter().cloned());
        install_add_tool(&registry, allowlist, audit)?;
    }
    Ok(registry)
}

/// The OpenAI-compatible service described by `settings.provider`.
pub fn provider_from_settings(settings: &AgentSettings) -> Result<Arc<dyn Provider>, AgentError> {
    let provider = OpenAiCompatProvider::from_config(&settings.provider)
        .map_err(|e| AgentError::Configuration(e.to_string()))?;
    Ok(Arc::new(provider))
}
