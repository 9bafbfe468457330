//! The sandboxed executor.
//!
//! Runs one action against a snapshot of the tool registry. Static checks
//! happen before anything runs, and a rejected action has no side effects at
//! all. Imports are checked first, on the raw source, so a blocked import is
//! a security violation even in code that does not parse.

use std::sync::Arc;
use std::time::{Duration, Instant};

use codeact_config::{ConfirmationConfig, ExecutorConfig};
use codeact_core::{
    ContextVariables, ErrorCategory, EventBus, ExecutionResult, ToolNamespace, ToolRegistry,
};
use codeact_security::{AuditLogger, CheckResult, ModuleAllowlist};

use crate::confirmation::{AutoDeny, ConfirmationHandler};
use crate::deadline::ActionDeadline;
use crate::script::{Interpreter, Limits, parse_program, scan_imports};

const AUDIT_ACTOR: &str = "executor";

pub struct Executor {
    registry: Arc<ToolRegistry>,
    allowlist: ModuleAllowlist,
    timeout: Duration,
    limits: Limits,
    confirmation: Arc<dyn ConfirmationHandler>,
    confirmation_timeout: Option<Duration>,
    events: Arc<EventBus>,
    audit: Arc<AuditLogger>,
}

impl Executor {
    /// An executor with default settings that denies every confirmation.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::from_settings(
            registry,
            &ExecutorConfig::default(),
            &ConfirmationConfig::default(),
        )
    }

    pub fn from_settings(
        registry: Arc<ToolRegistry>,
        executor: &ExecutorConfig,
        confirmation: &ConfirmationConfig,
    ) -> Self {
        Self {
            registry,
            allowlist: ModuleAllowlist::new(executor.allowed_modules.iter().cloned()),
            timeout: executor.timeout(),
            limits: Limits {
                max_operations: executor.max_operations,
                max_output_chars: executor.max_output_chars,
                ..Limits::default()
            },
            confirmation: Arc::new(AutoDeny),
            confirmation_timeout: confirmation.timeout(),
            events: Arc::new(EventBus::default()),
            audit: Arc::new(AuditLogger::new()),
        }
    }

    pub fn with_allowlist(mut self, allowlist: ModuleAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = handler;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn allowlist(&self) -> &ModuleAllowlist {
        &self.allowlist
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Documentation of every tool currently registered, for prompts.
    pub fn tool_docs(&self) -> String {
        self.registry.namespace().render_docs()
    }

    /// Run `code` with `variables` in scope.
    ///
    /// Never fails: every problem is reported in the returned
    /// [`ExecutionResult`] with its [`ErrorCategory`].
    pub async fn execute(&self, code: &str, variables: &ContextVariables) -> ExecutionResult {
        self.execute_in(code, variables, self.registry.namespace())
            .await
    }

    /// Run `code` against an explicit tool namespace.
    pub async fn execute_in(
        &self,
        code: &str,
        variables: &ContextVariables,
        namespace: ToolNamespace,
    ) -> ExecutionResult {
        let started = Instant::now();

        let imports = scan_imports(code);
        if let Some(CheckResult::Denied { name, reason }) = self
            .allowlist
            .first_violation(imports.iter().map(String::as_str))
        {
            tracing::warn!(module = %name, "Blocked import in action");
            self.audit.import_blocked(AUDIT_ACTOR, &name, &reason);
            return ExecutionResult::failure(ErrorCategory::SecurityViolation, reason)
                .with_elapsed(started.elapsed());
        }

        let program = match parse_program(code) {
            Ok(program) => program,
            Err(e) => {
                tracing::debug!(error = %e, "Action failed to parse");
                return ExecutionResult::failure(e.category(), e.to_string())
                    .with_elapsed(started.elapsed());
            }
        };

        if let Some(name) = program.first_forbidden_name() {
            tracing::warn!(name = %name, "Forbidden name in action");
            self.audit.forbidden_name(AUDIT_ACTOR, &name);
            return ExecutionResult::failure(
                ErrorCategory::SecurityViolation,
                format!("use of '{name}' is not allowed"),
            )
            .with_elapsed(started.elapsed());
        }

        let deadline = ActionDeadline::start(self.timeout);
        let mut interpreter = Interpreter::new(namespace)
            .with_limits(self.limits)
            .with_confirmation(Arc::clone(&self.confirmation), self.confirmation_timeout)
            .with_deadline(Arc::clone(&deadline))
            .with_events(Arc::clone(&self.events))
            .with_audit(Arc::clone(&self.audit))
            .with_variables(variables.clone());

        let run = tokio::select! {
            biased;
            outcome = interpreter.run(&program) => Some(outcome),
            () = deadline.expired() => None,
        };
        let output = interpreter.output().to_string();

        let result = match run {
            Some(Ok(outcome)) => {
                let mut result = ExecutionResult::success(outcome.result, outcome.task_status);
                result.next_step = outcome.next_step;
                result.local_variables = outcome.locals;
                result
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, category = %e.category(), "Action failed");
                ExecutionResult::failure(e.category(), e.to_string())
            }
            None => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    operations = interpreter.operations(),
                    "Action timed out"
                );
                ExecutionResult::failure(
                    ErrorCategory::Timeout,
                    format!(
                        "execution exceeded the {}s time limit",
                        self.timeout.as_secs_f64()
                    ),
                )
            }
        };
        result
            .with_output(output)
            .with_elapsed(started.elapsed())
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("tools", &self.registry.len())
            .field("allowed_modules", &self.allowlist.describe())
            .field("timeout", &self.timeout)
            .field("limits", &self.limits)
            .finish()
    }
}
