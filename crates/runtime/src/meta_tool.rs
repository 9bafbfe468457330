//! `agent.add_tool`: lets an action define a new tool in action code.
//!
//! The new tool lands in the `custom` toolbox of the shared registry and is
//! callable from the next action on. Its code runs in the same sandbox as
//! actions, with no tools of its own.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Weak};
use std::time::Duration;

use codeact_core::{
    ArgType, Tool, ToolArgument, ToolContext, ToolDefinition, ToolError, ToolNamespace,
    ToolRegistry, ToolResult,
};
use codeact_security::{AuditLogger, CheckResult, ModuleAllowlist};

use crate::script::value::display;
use crate::script::{Interpreter, Limits, Program, parse_program, scan_imports};

/// Toolbox that runtime-defined tools are registered in.
pub const CUSTOM_TOOLBOX: &str = "custom";

const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// A tool whose body is action code.
pub struct ScriptTool {
    definition: ToolDefinition,
    program: Arc<Program>,
    limits: Limits,
}

impl ScriptTool {
    pub fn new(definition: ToolDefinition, program: Program, limits: Limits) -> Self {
        Self {
            definition,
            program: Arc::new(program),
            limits,
        }
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(
        &self,
        arguments: Value,
        _context: Option<&ToolContext>,
    ) -> Result<ToolResult, ToolError> {
        let variables = match arguments {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        let mut interpreter = Interpreter::new(ToolNamespace::default())
            .with_limits(self.limits)
            .with_variables(variables);
        match interpreter.run(&self.program).await {
            Ok(outcome) => Ok(ToolResult::with_data(display(&outcome.result), outcome.result)),
            Err(e) => Err(ToolError::ExecutionFailed {
                tool_name: self.definition.qualified_name(),
                reason: e.to_string(),
            }),
        }
    }
}

/// The `agent.add_tool(name, code, parameters=[], description="")` tool.
///
/// Holds the registry weakly: the registry owns this tool.
pub struct AddToolTool {
    registry: Weak<ToolRegistry>,
    allowlist: ModuleAllowlist,
    limits: Limits,
    timeout: Duration,
    audit: Option<Arc<AuditLogger>>,
}

impl AddToolTool {
    pub fn new(registry: &Arc<ToolRegistry>, allowlist: ModuleAllowlist) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            allowlist,
            limits: Limits::default(),
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            audit: None,
        }
    }

    /// Limits applied to every call of a tool created by this one.
    pub fn with_limits(mut self, limits: Limits, timeout: Duration) -> Self {
        self.limits = limits;
        self.timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn build(&self, arguments: &Value) -> Result<ScriptTool, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments(reason);
        let name = arguments["name"]
            .as_str()
            .ok_or_else(|| invalid("name must be a string".into()))?;
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| invalid("code must be a string".into()))?;
        let description = arguments["description"].as_str().unwrap_or_default();

        let mut params = Vec::new();
        if let Value::Array(items) = &arguments["parameters"] {
            for item in items {
                params.push(parse_parameter(item).map_err(invalid)?);
            }
        }

        let imports = scan_imports(code);
        if let Some(CheckResult::Denied { reason, .. }) = self
            .allowlist
            .first_violation(imports.iter().map(String::as_str))
        {
            return Err(ToolError::PermissionDenied {
                tool_name: format!("{CUSTOM_TOOLBOX}.{name}"),
                reason,
            });
        }
        let program = parse_program(code)
            .map_err(|e| invalid(format!("code for '{name}' does not parse: {e}")))?;
        if let Some(forbidden) = program.first_forbidden_name() {
            return Err(ToolError::PermissionDenied {
                tool_name: format!("{CUSTOM_TOOLBOX}.{name}"),
                reason: format!("use of '{forbidden}' is not allowed"),
            });
        }

        let mut builder = ToolDefinition::builder(name)
            .toolbox(CUSTOM_TOOLBOX)
            .description(description)
            .timeout(self.timeout);
        for param in params {
            builder = builder.argument(param);
        }
        Ok(ScriptTool::new(builder.build(), program, self.limits))
    }
}

#[async_trait]
impl Tool for AddToolTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::builder("add_tool")
            .toolbox("agent")
            .description(
                "Define a reusable tool from action code. The code sees its parameters \
                 as variables and its returned value (or last expression) is the result. \
                 The new tool is called as custom.<name>(...) from the next action on.",
            )
            .argument(ToolArgument::required("name", ArgType::String, "Tool name (identifier)"))
            .argument(ToolArgument::required("code", ArgType::String, "Body of the tool"))
            .argument(ToolArgument::optional(
                "parameters",
                ArgType::List,
                json!([]),
                "Parameter names, or maps {name, type, default, description}",
            ))
            .argument(ToolArgument::optional(
                "description",
                ArgType::String,
                json!(""),
                "What the tool does",
            ))
            .returns("string")
            .confirmation("Allow the agent to register a new tool?")
            .build()
    }

    async fn execute(
        &self,
        arguments: Value,
        _context: Option<&ToolContext>,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.build(&arguments)?;
        let qualified = tool.definition.qualified_name();
        let registry = self.registry.upgrade().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "agent.add_tool".into(),
            reason: "the tool registry no longer exists".into(),
        })?;
        registry.register(Arc::new(tool))?;

        tracing::info!(tool = %qualified, "Registered tool from action code");
        if let Some(audit) = &self.audit {
            audit.tool_registered("agent.add_tool", &qualified);
        }
        Ok(ToolResult::with_data(
            format!("Registered {qualified}"),
            Value::String(qualified),
        ))
    }
}

/// Register `agent.add_tool` in `registry`.
pub fn install_add_tool(
    registry: &Arc<ToolRegistry>,
    allowlist: ModuleAllowlist,
    audit: Option<Arc<AuditLogger>>,
) -> Result<(), ToolError> {
    let mut tool = AddToolTool::new(registry, allowlist);
    if let Some(audit) = audit {
        tool = tool.with_audit(audit);
    }
    registry.register(Arc::new(tool))
}

fn parse_parameter(item: &Value) -> Result<ToolArgument, String> {
    match item {
        Value::String(name) => Ok(ToolArgument::required(name.clone(), ArgType::Any, "")),
        Value::Object(fields) => {
            let name = fields
                .get("name")
                .and_then(Value::as_str)
                .ok_or("each parameter needs a 'name'")?;
            let arg_type = match fields.get("type").and_then(Value::as_str) {
                Some(t) => parse_arg_type(t)?,
                None => ArgType::Any,
            };
            let description = fields
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(match fields.get("default") {
                Some(default) => {
                    ToolArgument::optional(name, arg_type, default.clone(), description)
                }
                None => ToolArgument::required(name, arg_type, description),
            })
        }
        other => Err(format!(
            "parameters must be names or maps, not {}",
            crate::script::value::type_name(other)
        )),
    }
}

fn parse_arg_type(name: &str) -> Result<ArgType, String> {
    Ok(match name {
        "string" | "str" => ArgType::String,
        "integer" | "int" => ArgType::Integer,
        "float" | "number" => ArgType::Float,
        "boolean" | "bool" => ArgType::Boolean,
        "list" | "array" => ArgType::List,
        "object" | "dict" | "map" => ArgType::Object,
        "any" => ArgType::Any,
        other => return Err(format!("unknown parameter type '{other}'")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        install_add_tool(&registry, ModuleAllowlist::new(["math"]), None).unwrap();
        registry
    }

    async fn add(registry: &Arc<ToolRegistry>, arguments: Value) -> Result<ToolResult, ToolError> {
        let tool = registry.get("agent", "add_tool").unwrap();
        tool.tool.execute(arguments, None).await
    }

    #[test]
    fn add_tool_always_needs_confirmation() {
        let registry = registry();
        let def = registry.get("agent", "add_tool").unwrap().definition;
        assert!(def.needs_confirmation());
    }

    #[tokio::test]
    async fn registers_and_runs_a_script_tool() {
        let registry = registry();
        let result = add(
            &registry,
            json!({
                "name": "hyp",
                "parameters": ["a", {"name": "b", "type": "float", "default": 4}],
                "code": "import math\nreturn math.sqrt(a * a + b * b)",
            }),
        )
        .await
        .unwrap();
        assert_eq!(result.data, Some(json!("custom.hyp")));

        let created = registry.get("custom", "hyp").unwrap();
        assert_eq!(created.definition.arguments.len(), 2);
        let out = created
            .tool
            .execute(json!({"a": 3, "b": 4}), None)
            .await
            .unwrap();
        assert_eq!(out.data, Some(json!(5.0)));
    }

    #[tokio::test]
    async fn rejects_bad_code() {
        let registry = registry();
        let err = add(&registry, json!({"name": "x", "code": "return (", "parameters": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)), "{err:?}");

        let err = add(&registry, json!({"name": "x", "code": "import os\nreturn 1", "parameters": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }), "{err:?}");

        let err = add(&registry, json!({"name": "x", "code": "import os, sys\nreturn 1", "parameters": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }), "{err:?}");

        let err = add(&registry, json!({"name": "x", "code": "eval('1')", "parameters": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }), "{err:?}");
        assert!(registry.get("custom", "x").is_none());
    }

    #[tokio::test]
    async fn names_cannot_be_reused() {
        let registry = registry();
        let definition = json!({"name": "one", "code": "1", "parameters": []});
        add(&registry, definition.clone()).await.unwrap();
        let err = add(&registry, definition).await.unwrap_err();
        assert!(matches!(err, ToolError::Registration { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn script_errors_become_tool_failures() {
        let registry = registry();
        add(&registry, json!({"name": "boom", "code": "return 1 // 0", "parameters": []}))
            .await
            .unwrap();
        let created = registry.get("custom", "boom").unwrap();
        let err = created.tool.execute(json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }), "{err:?}");
    }
}
