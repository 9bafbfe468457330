//! Tree-walking evaluator for parsed actions.
//!
//! Every recursive step returns a boxed future: tool calls, module calls
//! such as `time.sleep`, and confirmations are awaited in the middle of
//! expression evaluation. The interpreter counts operations and yields to
//! the scheduler regularly, so the executor's timeout can always fire.

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use codeact_core::{
    AgentEvent, ContextVariables, EventBus, TaskStatus, ToolContext, ToolDefinition, ToolError,
    ToolNamespace,
};
use codeact_security::AuditLogger;

use super::ast::{BinOp, CmpOp, Expr, FPart, FunctionDef, Program, Stmt, StmtKind, Target};
use super::builtins::{call_builtin, call_method, is_builtin};
use super::modules::{AVAILABLE_MODULES, Module};
use super::value::{
    binary_op, check_len, compare_values, contains, display, format_with_spec, get_index,
    index_mut, iterate, map_key, negate, set_index, slice, truthy, type_name, values_equal,
};
use crate::confirmation::{AutoDeny, ConfirmationHandler, ConfirmationRequest, request_confirmation};
use crate::deadline::ActionDeadline;
use crate::error::{ScriptError, ScriptResult};

const AUDIT_ACTOR: &str = "action";

/// Resource limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Statements, loop iterations and calls allowed before the run fails
    pub max_operations: u64,
    pub max_call_depth: usize,
    /// Printed text kept; the rest is replaced by a truncation marker
    pub max_output_chars: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_depth: 32,
            max_output_chars: 10_000,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub task_status: TaskStatus,
    pub result: Value,
    pub next_step: Option<String>,
    /// Top-level variables the action assigned or mutated
    pub locals: ContextVariables,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
    /// `complete`, `abort` or `continue_task` was called; see `Interpreter::finish`.
    Finish,
}

struct Finish {
    status: TaskStatus,
    result: Value,
    next_step: Option<String>,
}

pub struct Interpreter {
    namespace: ToolNamespace,
    confirmation: Arc<dyn ConfirmationHandler>,
    confirmation_timeout: Option<Duration>,
    deadline: Option<Arc<ActionDeadline>>,
    events: Option<Arc<EventBus>>,
    audit: Option<Arc<AuditLogger>>,
    limits: Limits,

    globals: ContextVariables,
    assigned: BTreeSet<String>,
    frames: Vec<ContextVariables>,
    functions: HashMap<String, Arc<FunctionDef>>,
    modules: HashMap<String, Module>,
    imported: HashMap<String, (Module, String)>,

    ops: u64,
    output: String,
    output_truncated: bool,
    last_value: Value,
    finish: Option<Finish>,
}

impl Interpreter {
    /// An interpreter over `namespace` that denies every confirmation.
    pub fn new(namespace: ToolNamespace) -> Self {
        Self {
            namespace,
            confirmation: Arc::new(AutoDeny),
            confirmation_timeout: None,
            deadline: None,
            events: None,
            audit: None,
            limits: Limits::default(),
            globals: ContextVariables::new(),
            assigned: BTreeSet::new(),
            frames: Vec::new(),
            functions: HashMap::new(),
            modules: HashMap::new(),
            imported: HashMap::new(),
            ops: 0,
            output: String::new(),
            output_truncated: false,
            last_value: Value::Null,
            finish: None,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_confirmation(
        mut self,
        handler: Arc<dyn ConfirmationHandler>,
        timeout: Option<Duration>,
    ) -> Self {
        self.confirmation = handler;
        self.confirmation_timeout = timeout;
        self
    }

    /// The clock the caller enforces; it is paused while a confirmation is
    /// pending.
    pub fn with_deadline(mut self, deadline: Arc<ActionDeadline>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Variables visible to the action before it runs. They are not part of
    /// [`RunOutcome::locals`] unless the action reassigns or mutates them.
    pub fn with_variables(mut self, variables: ContextVariables) -> Self {
        self.globals = variables;
        self
    }

    /// Text printed so far, also after a failed or interrupted run.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn operations(&self) -> u64 {
        self.ops
    }

    pub async fn run(&mut self, program: &Program) -> ScriptResult<RunOutcome> {
        let flow = self.exec_block(&program.body).await?;

        let (task_status, result, next_step) = match (self.finish.take(), flow) {
            (Some(finish), _) => (finish.status, finish.result, finish.next_step),
            (None, Flow::Return(value)) => interpret_returned(value),
            (None, _) => (
                TaskStatus::InProgress,
                std::mem::take(&mut self.last_value),
                None,
            ),
        };

        let locals = self
            .assigned
            .iter()
            .filter_map(|name| self.globals.get(name).map(|v| (name.clone(), v.clone())))
            .collect();

        Ok(RunOutcome {
            task_status,
            result,
            next_step,
            locals,
        })
    }

    // ─── Bookkeeping ─────────────────────────────────────────────────

    async fn tick(&mut self) -> ScriptResult<()> {
        self.ops += 1;
        if self.ops > self.limits.max_operations {
            return Err(ScriptError::limit(format!(
                "operation limit of {} exceeded",
                self.limits.max_operations
            )));
        }
        if self.ops % 256 == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn write_output(&mut self, text: &str) {
        if self.output_truncated {
            return;
        }
        let room = self.limits.max_output_chars.saturating_sub(self.output.chars().count());
        if text.chars().count() <= room {
            self.output.push_str(text);
        } else {
            self.output.extend(text.chars().take(room));
            self.output.push_str("\n... [output truncated]");
            self.output_truncated = true;
        }
    }

    // ─── Variables ───────────────────────────────────────────────────

    fn variable(&self, name: &str) -> Option<&Value> {
        self.frames
            .last()
            .and_then(|frame| frame.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn lookup(&self, name: &str) -> ScriptResult<Value> {
        if let Some(value) = self.variable(name) {
            return Ok(value.clone());
        }
        let message = if self.namespace.has_toolbox(name) {
            format!("'{name}' is a toolbox; call one of its tools, e.g. {name}.<tool>(...)")
        } else if self.modules.contains_key(name) || self.imported.contains_key(name) {
            format!("'{name}' is a module or module function and cannot be used as a value")
        } else if self.functions.contains_key(name) || is_builtin(name) {
            format!("function '{name}' cannot be used as a value; call it")
        } else {
            format!("name '{name}' is not defined")
        };
        Err(ScriptError::runtime(message))
    }

    fn scope_mut(&mut self) -> &mut ContextVariables {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        }
    }

    fn assign_name(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        if self.namespace.has_toolbox(name) {
            return Err(ScriptError::runtime(format!("cannot assign to toolbox '{name}'")));
        }
        if self.frames.is_empty() {
            self.functions.remove(name);
            self.modules.remove(name);
            self.imported.remove(name);
            self.assigned.insert(name.to_string());
        }
        self.scope_mut().insert(name.to_string(), value);
        Ok(())
    }

    /// Mutable access to `root[path[0]][path[1]]...`. Mutating a top-level
    /// variable counts as assigning it.
    fn place_mut(&mut self, root: &str, path: &[Value]) -> ScriptResult<&mut Value> {
        let local = self.frames.last().is_some_and(|frame| frame.contains_key(root));
        let slot = if local {
            self.frames.last_mut().and_then(|frame| frame.get_mut(root))
        } else {
            if self.globals.contains_key(root) {
                self.assigned.insert(root.to_string());
            }
            self.globals.get_mut(root)
        };
        let mut slot =
            slot.ok_or_else(|| ScriptError::runtime(format!("name '{root}' is not defined")))?;
        for index in path {
            slot = index_mut(slot, index)?;
        }
        Ok(slot)
    }

    fn place_get(&self, root: &str, path: &[Value]) -> ScriptResult<Value> {
        let mut current = self.lookup(root)?;
        for index in path {
            current = get_index(&current, index)?;
        }
        Ok(current)
    }

    fn is_place(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Name(name) => self.variable(name).is_some(),
            Expr::Index { base, .. } | Expr::Attr { base, .. } => self.is_place(base),
            _ => false,
        }
    }

    /// Evaluate the indices of a place expression such as `a["k"][0]`,
    /// returning the root variable name and pushing the path.
    fn resolve_place<'a>(
        &'a mut self,
        expr: &'a Expr,
        path: &'a mut Vec<Value>,
    ) -> BoxFuture<'a, ScriptResult<String>> {
        Box::pin(async move {
            match expr {
                Expr::Name(name) => Ok(name.clone()),
                Expr::Index { base, index } => {
                    let root = self.resolve_place(base, path).await?;
                    let index = self.eval_expr(index).await?;
                    path.push(index);
                    Ok(root)
                }
                Expr::Attr { base, name } => {
                    let root = self.resolve_place(base, path).await?;
                    path.push(Value::String(name.clone()));
                    Ok(root)
                }
                _ => Err(ScriptError::runtime("cannot assign to expression")),
            }
        })
    }

    fn assign_target<'a>(
        &'a mut self,
        target: &'a Target,
        value: Value,
    ) -> BoxFuture<'a, ScriptResult<()>> {
        Box::pin(async move {
            match target {
                Target::Name(name) => self.assign_name(name, value),
                Target::Tuple(targets) => {
                    let items = unpack(&value, targets.len())?;
                    for (target, item) in targets.iter().zip(items) {
                        self.assign_target(target, item).await?;
                    }
                    Ok(())
                }
                Target::Index { base, index } => {
                    let mut path = Vec::new();
                    let root = self.resolve_place(base, &mut path).await?;
                    let index = self.eval_expr(index).await?;
                    set_index(self.place_mut(&root, &path)?, &index, value)?;
                    Ok(())
                }
                Target::Attr { base, name } => {
                    let mut path = Vec::new();
                    let root = self.resolve_place(base, &mut path).await?;
                    let slot = self.place_mut(&root, &path)?;
                    if !slot.is_object() {
                        return Err(ScriptError::runtime(format!(
                            "'{}' object attribute '{name}' is read-only",
                            type_name(slot)
                        )));
                    }
                    set_index(slot, &Value::String(name.clone()), value)?;
                    Ok(())
                }
            }
        })
    }

    /// Bind a comprehension target without recording it as assigned.
    fn bind_temporary(&mut self, target: &Target, value: Value) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                self.scope_mut().insert(name.clone(), value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = unpack(&value, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.bind_temporary(target, item)?;
                }
                Ok(())
            }
            _ => Err(ScriptError::runtime(
                "comprehension targets must be names or tuples of names",
            )),
        }
    }

    // ─── Statements ──────────────────────────────────────────────────

    fn exec_block<'a>(&'a mut self, body: &'a [Stmt]) -> BoxFuture<'a, ScriptResult<Flow>> {
        Box::pin(async move {
            for stmt in body {
                let flow = self.exec_stmt(stmt).await?;
                if self.finish.is_some() {
                    return Ok(Flow::Finish);
                }
                if !matches!(flow, Flow::Normal) {
                    return Ok(flow);
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, ScriptResult<Flow>> {
        Box::pin(async move {
            self.tick().await.map_err(|e| e.at_line(stmt.line))?;
            self.exec_kind(&stmt.kind)
                .await
                .map_err(|e| e.at_line(stmt.line))
        })
    }

    fn exec_kind<'a>(&'a mut self, kind: &'a StmtKind) -> BoxFuture<'a, ScriptResult<Flow>> {
        Box::pin(async move {
            match kind {
                StmtKind::Import { module, alias } => {
                    let resolved = resolve_module(module)?;
                    let name = alias.clone().unwrap_or_else(|| module.clone());
                    self.bind_module(name, resolved)?;
                }
                StmtKind::FromImport { module, names } => {
                    let resolved = resolve_module(module)?;
                    for (name, alias) in names {
                        let bound = alias.clone().unwrap_or_else(|| name.clone());
                        if resolved.functions().contains(&name.as_str()) {
                            self.imported.insert(bound, (resolved, name.clone()));
                        } else {
                            let value = resolved.attribute(name).map_err(|_| {
                                ScriptError::runtime(format!(
                                    "cannot import name '{name}' from '{module}'"
                                ))
                            })?;
                            self.scope_mut().insert(bound, value);
                        }
                    }
                }
                StmtKind::Assign { target, value } => {
                    let value = self.eval_expr(value).await?;
                    self.assign_target(target, value).await?;
                }
                StmtKind::AugAssign { target, op, value } => {
                    self.exec_aug_assign(target, *op, value).await?;
                }
                StmtKind::Expr(expr) => {
                    let value = self.eval_expr(expr).await?;
                    if self.frames.is_empty() {
                        self.last_value = value;
                    }
                }
                StmtKind::If { branches, orelse } => {
                    for (cond, body) in branches {
                        if truthy(&self.eval_expr(cond).await?) {
                            return self.exec_block(body).await;
                        }
                    }
                    return self.exec_block(orelse).await;
                }
                StmtKind::For { target, iter, body } => {
                    let items = iterate(&self.eval_expr(iter).await?)?;
                    for item in items {
                        self.tick().await?;
                        self.assign_target(target, item).await?;
                        match self.exec_block(body).await? {
                            Flow::Break => break,
                            Flow::Normal | Flow::Continue => {}
                            other => return Ok(other),
                        }
                    }
                }
                StmtKind::While { cond, body } => {
                    while truthy(&self.eval_expr(cond).await?) {
                        self.tick().await?;
                        match self.exec_block(body).await? {
                            Flow::Break => break,
                            Flow::Normal | Flow::Continue => {}
                            other => return Ok(other),
                        }
                    }
                }
                StmtKind::FunctionDef(def) => {
                    if self.namespace.has_toolbox(&def.name) {
                        return Err(ScriptError::runtime(format!(
                            "cannot define function '{}': the name is a toolbox",
                            def.name
                        )));
                    }
                    self.functions.insert(def.name.clone(), Arc::clone(def));
                }
                StmtKind::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval_expr(expr).await?,
                        None => Value::Null,
                    };
                    return Ok(Flow::Return(value));
                }
                StmtKind::Assert { cond, message } => {
                    if !truthy(&self.eval_expr(cond).await?) {
                        let text = match message {
                            Some(expr) => format!("AssertionError: {}", display(&self.eval_expr(expr).await?)),
                            None => "AssertionError".to_string(),
                        };
                        return Err(ScriptError::runtime(text));
                    }
                }
                StmtKind::Break => return Ok(Flow::Break),
                StmtKind::Continue => return Ok(Flow::Continue),
                StmtKind::Pass => {}
            }
            Ok(Flow::Normal)
        })
    }

    fn bind_module(&mut self, name: String, module: Module) -> ScriptResult<()> {
        if self.namespace.has_toolbox(&name) {
            return Err(ScriptError::runtime(format!(
                "cannot import '{}' as '{name}': the name is a toolbox",
                module.name()
            )));
        }
        self.modules.insert(name, module);
        Ok(())
    }

    async fn exec_aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval_expr(value).await?;
                let updated = binary_op(op, &current, &rhs)?;
                self.assign_name(name, updated)
            }
            Target::Index { base, index } => {
                let mut path = Vec::new();
                let root = self.resolve_place(base, &mut path).await?;
                let key = self.eval_expr(index).await?;
                self.update_item(&root, &path, key, op, value).await
            }
            Target::Attr { base, name } => {
                let mut path = Vec::new();
                let root = self.resolve_place(base, &mut path).await?;
                self.update_item(&root, &path, Value::String(name.clone()), op, value)
                    .await
            }
            Target::Tuple(_) => Err(ScriptError::runtime(
                "illegal expression for augmented assignment",
            )),
        }
    }

    async fn update_item(
        &mut self,
        root: &str,
        path: &[Value],
        key: Value,
        op: BinOp,
        value: &Expr,
    ) -> ScriptResult<()> {
        let rhs = self.eval_expr(value).await?;
        let slot = self.place_mut(root, path)?;
        let current = get_index(slot, &key)?;
        let updated = binary_op(op, &current, &rhs)?;
        set_index(slot, &key, updated)?;
        Ok(())
    }

    // ─── Expressions ─────────────────────────────────────────────────

    fn eval_expr<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, ScriptResult<Value>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Name(name) => self.lookup(name),
                Expr::FString(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            FPart::Text(text) => out.push_str(text),
                            FPart::Expr { expr, spec } => {
                                let value = self.eval_expr(expr).await?;
                                match spec {
                                    Some(spec) => out.push_str(&format_with_spec(&value, spec)?),
                                    None => out.push_str(&display(&value)),
                                }
                            }
                        }
                    }
                    check_len(out.len())?;
                    Ok(Value::String(out))
                }
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expr::Map(entries) => {
                    let mut map = Map::new();
                    for (key, value) in entries {
                        let key = map_key(&self.eval_expr(key).await?)?;
                        let value = self.eval_expr(value).await?;
                        map.insert(key, value);
                    }
                    Ok(Value::Object(map))
                }
                Expr::ListComp {
                    expr,
                    target,
                    iter,
                    cond,
                } => self.eval_comprehension(expr, target, iter, cond.as_deref()).await,
                Expr::Attr { base, name } => self.eval_attr(base, name).await,
                Expr::Index { base, index } => {
                    let base = self.eval_expr(base).await?;
                    let index = self.eval_expr(index).await?;
                    Ok(get_index(&base, &index)?)
                }
                Expr::Slice { base, start, end } => {
                    let base = self.eval_expr(base).await?;
                    let start = match start {
                        Some(e) => Some(self.eval_expr(e).await?),
                        None => None,
                    };
                    let end = match end {
                        Some(e) => Some(self.eval_expr(e).await?),
                        None => None,
                    };
                    Ok(slice(&base, start.as_ref(), end.as_ref())?)
                }
                Expr::Call { func, args, kwargs } => {
                    let mut arg_values = Vec::with_capacity(args.len());
                    for arg in args {
                        arg_values.push(self.eval_expr(arg).await?);
                    }
                    let mut kwarg_values = Vec::with_capacity(kwargs.len());
                    for (name, arg) in kwargs {
                        if kwarg_values.iter().any(|(k, _): &(String, Value)| k == name) {
                            return Err(ScriptError::runtime(format!(
                                "keyword argument repeated: {name}"
                            )));
                        }
                        kwarg_values.push((name.clone(), self.eval_expr(arg).await?));
                    }
                    self.call(func, arg_values, kwarg_values).await
                }
                Expr::Neg(inner) => Ok(negate(&self.eval_expr(inner).await?)?),
                Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval_expr(inner).await?))),
                Expr::Binary { op, left, right } => {
                    let left = self.eval_expr(left).await?;
                    let right = self.eval_expr(right).await?;
                    Ok(binary_op(*op, &left, &right)?)
                }
                Expr::Compare { first, rest } => {
                    let mut left = self.eval_expr(first).await?;
                    for (op, right) in rest {
                        let right = self.eval_expr(right).await?;
                        if !compare(*op, &left, &right)? {
                            return Ok(Value::Bool(false));
                        }
                        left = right;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::And(left, right) => {
                    let left = self.eval_expr(left).await?;
                    if !truthy(&left) {
                        return Ok(left);
                    }
                    self.eval_expr(right).await
                }
                Expr::Or(left, right) => {
                    let left = self.eval_expr(left).await?;
                    if truthy(&left) {
                        return Ok(left);
                    }
                    self.eval_expr(right).await
                }
                Expr::IfElse {
                    cond,
                    then,
                    otherwise,
                } => {
                    if truthy(&self.eval_expr(cond).await?) {
                        self.eval_expr(then).await
                    } else {
                        self.eval_expr(otherwise).await
                    }
                }
                Expr::Await(inner) => self.eval_expr(inner).await,
            }
        })
    }

    async fn eval_comprehension(
        &mut self,
        expr: &Expr,
        target: &Target,
        iter: &Expr,
        cond: Option<&Expr>,
    ) -> ScriptResult<Value> {
        let items = iterate(&self.eval_expr(iter).await?)?;
        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .iter()
            .map(|name| (name.clone(), self.scope_mut().get(name).cloned()))
            .collect();

        let mut collected = Vec::new();
        let result = self
            .collect_comprehension(expr, target, items, cond, &mut collected)
            .await;

        let scope = self.scope_mut();
        for (name, previous) in saved {
            match previous {
                Some(value) => scope.insert(name, value),
                None => scope.remove(&name),
            };
        }
        result.map(|()| Value::Array(collected))
    }

    async fn collect_comprehension(
        &mut self,
        expr: &Expr,
        target: &Target,
        items: Vec<Value>,
        cond: Option<&Expr>,
        collected: &mut Vec<Value>,
    ) -> ScriptResult<()> {
        for item in items {
            self.tick().await?;
            self.bind_temporary(target, item)?;
            if let Some(cond) = cond {
                if !truthy(&self.eval_expr(cond).await?) {
                    continue;
                }
            }
            collected.push(self.eval_expr(expr).await?);
            if self.finish.is_some() {
                break;
            }
        }
        Ok(())
    }

    async fn eval_attr(&mut self, base: &Expr, name: &str) -> ScriptResult<Value> {
        if let Expr::Name(root) = base {
            if self.variable(root).is_none() {
                if self.namespace.has_toolbox(root) {
                    return Err(ScriptError::runtime(format!(
                        "tool {root}.{name} must be called, e.g. {root}.{name}(...)"
                    )));
                }
                if let Some(module) = self.modules.get(root).copied() {
                    return Ok(module.attribute(name)?);
                }
            }
        }
        let value = self.eval_expr(base).await?;
        match &value {
            Value::Object(map) => map.get(name).cloned().ok_or_else(|| {
                ScriptError::runtime(format!("'dict' object has no attribute '{name}'"))
            }),
            other => Err(ScriptError::runtime(format!(
                "'{}' object has no attribute '{name}'",
                type_name(other)
            ))),
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────

    fn call<'a>(
        &'a mut self,
        func: &'a Expr,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> BoxFuture<'a, ScriptResult<Value>> {
        Box::pin(async move {
            // Nothing runs once the action has finished, even later in the
            // same statement.
            if self.finish.is_some() {
                return Ok(Value::Null);
            }
            match func {
                Expr::Name(name) => self.call_name(name, args, kwargs).await,
                Expr::Attr { base, name } => {
                    if let Expr::Name(root) = base.as_ref() {
                        if self.namespace.has_toolbox(root) {
                            return self.call_tool(root, name, args, kwargs).await;
                        }
                        if let Some(module) = self.modules.get(root).copied() {
                            return Ok(module.call(name, &args, &kwargs).await?);
                        }
                        if self.variable(root).is_none() {
                            let message = if Module::from_name(root).is_some() {
                                format!("name '{root}' is not defined; did you forget `import {root}`?")
                            } else {
                                format!("name '{root}' is not defined")
                            };
                            return Err(ScriptError::runtime(message));
                        }
                    }
                    self.call_method_on(base, name, args, kwargs).await
                }
                other => {
                    let value = self.eval_expr(other).await?;
                    Err(ScriptError::runtime(format!(
                        "'{}' object is not callable",
                        type_name(&value)
                    )))
                }
            }
        })
    }

    async fn call_method_on(
        &mut self,
        base: &Expr,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        if !self.is_place(base) {
            let receiver = self.eval_expr(base).await?;
            return Ok(call_method(&receiver, method, &args, &kwargs)?.value);
        }
        let mut path = Vec::new();
        let root = self.resolve_place(base, &mut path).await?;
        let receiver = self.place_get(&root, &path)?;
        let outcome = call_method(&receiver, method, &args, &kwargs)?;
        if let Some(updated) = outcome.updated {
            *self.place_mut(&root, &path)? = updated;
        }
        Ok(outcome.value)
    }

    async fn call_name(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        if let Some(def) = self.functions.get(name).cloned() {
            return self.call_function(def, args, kwargs).await;
        }
        if let Some((module, function)) = self.imported.get(name).cloned() {
            return Ok(module.call(&function, &args, &kwargs).await?);
        }
        match name {
            "print" => {
                let sep = kwarg_text(&kwargs, "sep").unwrap_or_else(|| " ".to_string());
                let end = kwarg_text(&kwargs, "end").unwrap_or_else(|| "\n".to_string());
                let line = args.iter().map(display).collect::<Vec<_>>().join(&sep);
                self.write_output(&format!("{line}{end}"));
                return Ok(Value::Null);
            }
            "complete" => {
                let result = arg_or_kwarg(&args, &kwargs, 0, "result").unwrap_or(Value::Null);
                return Ok(self.finish_with(TaskStatus::Completed, result, None));
            }
            "abort" => {
                let reason = arg_or_kwarg(&args, &kwargs, 0, "reason")
                    .unwrap_or_else(|| Value::String("aborted".to_string()));
                return Ok(self.finish_with(TaskStatus::Aborted, reason, None));
            }
            "continue_task" => {
                let result = arg_or_kwarg(&args, &kwargs, 0, "result").unwrap_or(Value::Null);
                let next_step = arg_or_kwarg(&args, &kwargs, 1, "next_step").map(|v| display(&v));
                return Ok(self.finish_with(TaskStatus::InProgress, result, next_step));
            }
            _ => {}
        }
        if is_builtin(name) {
            return Ok(call_builtin(name, &args, &kwargs)?);
        }
        if let Some(value) = self.variable(name) {
            return Err(ScriptError::runtime(format!(
                "'{}' object is not callable",
                type_name(value)
            )));
        }
        let suggestion = self
            .namespace
            .tools()
            .find(|t| t.definition.name == name)
            .map(|t| t.definition.qualified_name());
        Err(ScriptError::runtime(match suggestion {
            Some(qualified) => format!("name '{name}' is not defined; did you mean {qualified}(...)?"),
            None => format!("name '{name}' is not defined"),
        }))
    }

    fn finish_with(&mut self, status: TaskStatus, result: Value, next_step: Option<String>) -> Value {
        self.finish = Some(Finish {
            status,
            result,
            next_step,
        });
        Value::Null
    }

    async fn call_function(
        &mut self,
        def: Arc<FunctionDef>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(ScriptError::limit(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_call_depth
            )));
        }
        self.tick().await?;

        if args.len() > def.params.len() {
            return Err(ScriptError::runtime(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        let mut frame = ContextVariables::new();
        for ((param, _), value) in def.params.iter().zip(args) {
            frame.insert(param.clone(), value);
        }
        for (name, value) in kwargs {
            if !def.params.iter().any(|(p, _)| *p == name) {
                return Err(ScriptError::runtime(format!(
                    "{}() got an unexpected keyword argument '{name}'",
                    def.name
                )));
            }
            if frame.contains_key(&name) {
                return Err(ScriptError::runtime(format!(
                    "{}() got multiple values for argument '{name}'",
                    def.name
                )));
            }
            frame.insert(name, value);
        }
        for (param, default) in &def.params {
            if frame.contains_key(param) {
                continue;
            }
            match default {
                Some(expr) => {
                    let value = self.eval_expr(expr).await?;
                    frame.insert(param.clone(), value);
                }
                None => {
                    return Err(ScriptError::runtime(format!(
                        "{}() missing required argument '{param}'",
                        def.name
                    )));
                }
            }
        }

        self.frames.push(frame);
        let flow = self.exec_block(&def.body).await;
        self.frames.pop();
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    async fn call_tool(
        &mut self,
        toolbox: &str,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        let registered = match self.namespace.get(toolbox, name) {
            Some(registered) => registered.clone(),
            None => {
                let available: Vec<&str> = self
                    .namespace
                    .tools()
                    .filter(|t| t.definition.toolbox == toolbox)
                    .map(|t| t.definition.name.as_str())
                    .collect();
                return Err(ScriptError::runtime(format!(
                    "toolbox '{toolbox}' has no tool '{name}' (available: {})",
                    available.join(", ")
                )));
            }
        };
        let definition = Arc::clone(&registered.definition);
        let qualified = definition.qualified_name();
        let arguments = Value::Object(bind_tool_arguments(&definition, args, kwargs)?);

        if let Some(message) = &definition.confirmation {
            self.emit(AgentEvent::ConfirmationRequested {
                tool: qualified.clone(),
                message: message.clone(),
            });
            let request = ConfirmationRequest {
                tool: qualified.clone(),
                message: message.clone(),
                arguments: arguments.clone(),
            };
            let approved = {
                let _paused = self.deadline.as_ref().map(ActionDeadline::pause);
                request_confirmation(
                    self.confirmation.as_ref(),
                    &request,
                    self.confirmation_timeout,
                )
                .await
            };
            self.emit(AgentEvent::ConfirmationResolved {
                tool: qualified.clone(),
                approved,
            });
            if let Some(audit) = &self.audit {
                audit.confirmation(AUDIT_ACTOR, &qualified, approved);
            }
            if !approved {
                return Err(ScriptError::ConfirmationDenied { tool: qualified });
            }
        }

        self.emit(AgentEvent::ToolExecutionStarted {
            tool: qualified.clone(),
            arguments: arguments.clone(),
            timestamp: Utc::now(),
        });
        tracing::debug!(tool = %qualified, "Calling tool");

        let context = definition.inject_context.then(|| ToolContext {
            variables: self.visible_variables(),
        });
        let started = Instant::now();
        let execution = registered.tool.execute(arguments, context.as_ref());
        let result = match definition.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: qualified.clone(),
                    timeout_secs: limit.as_secs(),
                }),
            },
            None => execution.await,
        };

        let outcome = match result {
            Ok(tool_result) if tool_result.success => Ok(tool_result.into_value()),
            Ok(tool_result) => Err(ScriptError::runtime(format!(
                "{qualified} failed: {}",
                tool_result.output
            ))),
            Err(ToolError::ConfirmationDenied { .. }) => Err(ScriptError::ConfirmationDenied {
                tool: qualified.clone(),
            }),
            Err(ToolError::Timeout { timeout_secs, .. }) => Err(ScriptError::ToolTimeout {
                tool: qualified.clone(),
                secs: timeout_secs,
            }),
            Err(e) => Err(ScriptError::runtime(format!("{qualified} failed: {e}"))),
        };

        let success = outcome.is_ok();
        self.emit(AgentEvent::ToolExecutionCompleted {
            tool: qualified.clone(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        if let Some(audit) = &self.audit {
            let details = outcome.as_ref().err().map(|e| e.to_string());
            audit.tool_execution(AUDIT_ACTOR, &qualified, success, details);
        }
        if let Err(e) = &outcome {
            tracing::debug!(tool = %qualified, error = %e, "Tool call failed");
        }
        outcome
    }

    /// Globals overlaid with the current function's locals.
    fn visible_variables(&self) -> ContextVariables {
        let mut variables = self.globals.clone();
        if let Some(frame) = self.frames.last() {
            variables.extend(frame.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        variables
    }
}

/// Bind positional and keyword arguments to a tool's declared arguments,
/// filling defaults and checking types.
pub fn bind_tool_arguments(
    definition: &ToolDefinition,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Map<String, Value>, String> {
    let qualified = definition.qualified_name();
    if args.len() > definition.arguments.len() {
        return Err(format!(
            "{qualified}() takes {} arguments but {} were given",
            definition.arguments.len(),
            args.len()
        ));
    }
    let mut bound = Map::new();
    for (declared, value) in definition.arguments.iter().zip(args) {
        bound.insert(declared.name.clone(), value);
    }
    for (name, value) in kwargs {
        if definition.argument(&name).is_none() {
            return Err(format!("{qualified}() got an unexpected keyword argument '{name}'"));
        }
        if bound.contains_key(&name) {
            return Err(format!("{qualified}() got multiple values for argument '{name}'"));
        }
        bound.insert(name, value);
    }
    for declared in &definition.arguments {
        if let Some(value) = bound.get(&declared.name) {
            if !declared.arg_type.accepts(value) {
                return Err(format!(
                    "{qualified}() argument '{}' must be {}, not {}",
                    declared.name,
                    declared.arg_type,
                    type_name(value)
                ));
            }
            continue;
        }
        match &declared.default {
            Some(default) => {
                bound.insert(declared.name.clone(), default.clone());
            }
            None if declared.required => {
                return Err(format!(
                    "{qualified}() missing required argument '{}'",
                    declared.name
                ));
            }
            None => {}
        }
    }
    Ok(bound)
}

fn resolve_module(name: &str) -> ScriptResult<Module> {
    Module::from_name(name).ok_or_else(|| {
        ScriptError::runtime(format!(
            "module '{name}' is not available (available: {})",
            AVAILABLE_MODULES.join(", ")
        ))
    })
}

/// A returned map with a `status` key ends the task the same way the
/// control functions do.
fn interpret_returned(value: Value) -> (TaskStatus, Value, Option<String>) {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .and_then(TaskStatus::parse);
    match (status, value) {
        (Some(status), Value::Object(mut map)) => {
            let result = match status {
                TaskStatus::Aborted => map.remove("reason").or_else(|| map.remove("result")),
                _ => map.remove("result"),
            }
            .unwrap_or(Value::Null);
            let next_step = map.get("next_step").map(display);
            (status, result, next_step)
        }
        (_, value) => (TaskStatus::InProgress, value, None),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> ScriptResult<bool> {
    use std::cmp::Ordering;
    Ok(match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        CmpOp::Lt => compare_values(left, right)? == Ordering::Less,
        CmpOp::Le => compare_values(left, right)? != Ordering::Greater,
        CmpOp::Gt => compare_values(left, right)? == Ordering::Greater,
        CmpOp::Ge => compare_values(left, right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
    })
}

fn unpack(value: &Value, expected: usize) -> ScriptResult<Vec<Value>> {
    let items = iterate(value)?;
    match items.len().cmp(&expected) {
        std::cmp::Ordering::Equal => Ok(items),
        std::cmp::Ordering::Greater => Err(ScriptError::runtime(format!(
            "too many values to unpack (expected {expected})"
        ))),
        std::cmp::Ordering::Less => Err(ScriptError::runtime(format!(
            "not enough values to unpack (expected {expected}, got {})",
            items.len()
        ))),
    }
}

fn target_names(target: &Target, names: &mut Vec<String>) {
    match target {
        Target::Name(name) => names.push(name.clone()),
        Target::Tuple(targets) => targets.iter().for_each(|t| target_names(t, names)),
        Target::Index { .. } | Target::Attr { .. } => {}
    }
}

fn kwarg_text(kwargs: &[(String, Value)], name: &str) -> Option<String> {
    kwargs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| display(v))
}

fn arg_or_kwarg(args: &[Value], kwargs: &[(String, Value)], index: usize, name: &str) -> Option<Value> {
    args.get(index)
        .cloned()
        .or_else(|| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::{AutoApprove, FnConfirmation};
    use crate::script::parse_program;
    use async_trait::async_trait;
    use codeact_core::{ArgType, Tool, ToolArgument, ToolRegistry, ToolResult};
    use serde_json::json;

    struct Adder;

    #[async_trait]
    impl Tool for Adder {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::builder("add")
                .toolbox("calc")
                .argument(ToolArgument::required("a", ArgType::Integer, ""))
                .argument(ToolArgument::optional("b", ArgType::Integer, json!(1), ""))
                .returns("integer")
                .build()
        }

        async fn execute(
            &self,
            arguments: Value,
            _context: Option<&ToolContext>,
        ) -> Result<ToolResult, ToolError> {
            let sum = arguments["a"].as_i64().unwrap_or(0) + arguments["b"].as_i64().unwrap_or(0);
            Ok(ToolResult::with_data(sum.to_string(), json!(sum)))
        }
    }

    struct Guarded;

    #[async_trait]
    impl Tool for Guarded {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::builder("wipe")
                .toolbox("danger")
                .confirmation("Really wipe?")
                .build()
        }

        async fn execute(
            &self,
            _arguments: Value,
            _context: Option<&ToolContext>,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("wiped"))
        }
    }

    fn namespace() -> ToolNamespace {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Adder)).unwrap();
        registry.register(Arc::new(Guarded)).unwrap();
        registry.namespace()
    }

    async fn run(source: &str) -> ScriptResult<RunOutcome> {
        let program = parse_program(source)?;
        Interpreter::new(namespace()).run(&program).await
    }

    #[tokio::test]
    async fn last_expression_is_the_result() {
        let outcome = run("x = 2\nx * 21").await.unwrap();
        assert_eq!(outcome.result, json!(42));
        assert_eq!(outcome.task_status, TaskStatus::InProgress);
        assert_eq!(outcome.locals, json!({"x": 2}).as_object().cloned().unwrap());
    }

    #[tokio::test]
    async fn tool_calls_bind_arguments() {
        assert_eq!(run("calc.add(2, 3)").await.unwrap().result, json!(5));
        assert_eq!(run("calc.add(a=2)").await.unwrap().result, json!(3));
        let err = run("calc.add('x')").await.unwrap_err();
        assert!(err.to_string().contains("must be integer"), "{err}");
        let err = run("calc.add(1, c=2)").await.unwrap_err();
        assert!(err.to_string().contains("unexpected keyword"), "{err}");
        let err = run("calc.mul(1)").await.unwrap_err();
        assert!(err.to_string().contains("available: add"), "{err}");
    }

    #[tokio::test]
    async fn complete_and_abort_end_the_task() {
        let outcome = run("complete(calc.add(2, 2))\nprint('unreachable')").await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::Completed);
        assert_eq!(outcome.result, json!(4));

        let outcome = run("abort('no data')").await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::Aborted);
        assert_eq!(outcome.result, json!("no data"));

        let outcome = run("continue_task(1, next_step='check totals')").await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::InProgress);
        assert_eq!(outcome.next_step.as_deref(), Some("check totals"));
    }

    #[tokio::test]
    async fn returned_status_map_is_honoured() {
        let outcome = run("return {'status': 'completed', 'result': 7}").await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::Completed);
        assert_eq!(outcome.result, json!(7));

        let outcome = run("return {'value': 7}").await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::InProgress);
        assert_eq!(outcome.result, json!({"value": 7}));
    }

    #[tokio::test]
    async fn complete_inside_a_function_ends_the_action() {
        let source = "def finish(x):\n    complete(x * 2)\n    return 0\nfinish(5)\nprint('no')";
        let outcome = run(source).await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::Completed);
        assert_eq!(outcome.result, json!(10));
    }

    #[tokio::test]
    async fn mutating_methods_write_back() {
        let source = "items = []\nfor i in range(3):\n    items.append(i * i)\nd = {'a': {'b': []}}\nd['a']['b'].append(1)\nd['a']['n'] = 2\nd";
        let outcome = run(source).await.unwrap();
        assert_eq!(outcome.locals["items"], json!([0, 1, 4]));
        assert_eq!(outcome.result, json!({"a": {"b": [1], "n": 2}}));
    }

    #[tokio::test]
    async fn functions_and_recursion() {
        let source = "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\nfib(10)";
        assert_eq!(run(source).await.unwrap().result, json!(55));

        let err = run("def f(n):\n    return f(n + 1)\nf(0)").await.unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { line: 2, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn comprehension_targets_do_not_leak() {
        let outcome = run("squares = [x * x for x in range(4) if x % 2 == 0]\nsquares").await.unwrap();
        assert_eq!(outcome.result, json!([0, 4]));
        assert!(!outcome.locals.contains_key("x"));
    }

    #[tokio::test]
    async fn modules_need_import() {
        assert_eq!(run("import math\nmath.floor(2.5)").await.unwrap().result, json!(2));
        assert_eq!(run("from math import sqrt\nsqrt(9)").await.unwrap().result, json!(3.0));
        let err = run("math.floor(2.5)").await.unwrap_err();
        assert!(err.to_string().contains("import math"), "{err}");
        let err = run("import statistics").await.unwrap_err();
        assert!(err.to_string().contains("not available"), "{err}");
    }

    #[tokio::test]
    async fn errors_carry_the_failing_line() {
        let err = run("a = 1\nb = [1, 2]\nc = b[5]").await.unwrap_err();
        assert_eq!(
            err,
            ScriptError::Runtime {
                line: 3,
                message: "list index out of range".into()
            }
        );
    }

    #[tokio::test]
    async fn operation_budget_is_enforced() {
        let program = parse_program("while True:\n    pass").unwrap();
        let mut interpreter = Interpreter::new(namespace()).with_limits(Limits {
            max_operations: 1_000,
            ..Limits::default()
        });
        let err = interpreter.run(&program).await.unwrap_err();
        assert_eq!(err.category(), codeact_core::ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn confirmation_gates_tools() {
        let err = run("danger.wipe()").await.unwrap_err();
        assert_eq!(err, ScriptError::ConfirmationDenied { tool: "danger.wipe".into() });

        let program = parse_program("danger.wipe()").unwrap();
        let outcome = Interpreter::new(namespace())
            .with_confirmation(Arc::new(AutoApprove), None)
            .run(&program)
            .await
            .unwrap();
        assert_eq!(outcome.result, json!("wiped"));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let handler = FnConfirmation::new(move |req: &ConfirmationRequest| {
            recorder.lock().unwrap().push(req.message.clone());
            false
        });
        let err = Interpreter::new(namespace())
            .with_confirmation(Arc::new(handler), None)
            .run(&program)
            .await
            .unwrap_err();
        assert_eq!(err.category(), codeact_core::ErrorCategory::ConfirmationDenied);
        assert_eq!(*seen.lock().unwrap(), vec!["Really wipe?".to_string()]);
    }

    #[tokio::test]
    async fn nothing_runs_after_complete_in_the_same_statement() {
        let asked = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let handler = FnConfirmation::new(move |_: &ConfirmationRequest| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            true
        });
        let program = parse_program("[complete(1), danger.wipe(), print('late')]").unwrap();
        let mut interpreter =
            Interpreter::new(namespace()).with_confirmation(Arc::new(handler), None);
        let outcome = interpreter.run(&program).await.unwrap();
        assert_eq!(outcome.task_status, TaskStatus::Completed);
        assert_eq!(outcome.result, json!(1));
        assert_eq!(asked.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(interpreter.output().is_empty());
    }

    #[tokio::test]
    async fn print_output_is_captured_and_capped() {
        let program = parse_program("for i in range(100):\n    print('line', i)").unwrap();
        let mut interpreter = Interpreter::new(namespace()).with_limits(Limits {
            max_output_chars: 20,
            ..Limits::default()
        });
        interpreter.run(&program).await.unwrap();
        assert!(interpreter.output().starts_with("line 0\nline 1\n"));
        assert!(interpreter.output().ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn context_variables_are_visible_but_not_captured() {
        let program = parse_program("total = base + 1\ntotal").unwrap();
        let mut variables = ContextVariables::new();
        variables.insert("base".into(), json!(41));
        let outcome = Interpreter::new(namespace())
            .with_variables(variables)
            .run(&program)
            .await
            .unwrap();
        assert_eq!(outcome.result, json!(42));
        assert!(!outcome.locals.contains_key("base"));
        assert_eq!(outcome.locals["total"], json!(42));
    }

    #[tokio::test]
    async fn toolbox_names_are_reserved() {
        let err = run("calc = 3").await.unwrap_err();
        assert!(err.to_string().contains("toolbox"), "{err}");
        let err = run("calc").await.unwrap_err();
        assert!(err.to_string().contains("toolbox"), "{err}");
    }

    #[test]
    fn binding_fills_defaults() {
        let def = Adder.definition();
        let bound = bind_tool_arguments(&def, vec![json!(5)], vec![]).unwrap();
        assert_eq!(Value::Object(bound), json!({"a": 5, "b": 1}));
        let err = bind_tool_arguments(&def, vec![], vec![]).unwrap_err();
        assert!(err.contains("missing required argument 'a'"));
        let err = bind_tool_arguments(&def, vec![json!(1)], vec![("a".into(), json!(2))]).unwrap_err();
        assert!(err.contains("multiple values"));
    }
}
