//! Tools, their definitions and the shared registry.
//!
//! Tools are what give the agent the ability to act in the world. Generated
//! actions call them as `toolbox.tool(...)`, so every tool declares an
//! explicit, typed argument schema up front (the [`ToolDefinition`]). The
//! schema is validated once, at registration, and is immutable afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::ToolError;
use crate::execution::ContextVariables;

// ── Schema ────────────────────────────────────────────────────────────────

/// The declared type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Object,
    Any,
}

impl ArgType {
    /// Whether a JSON value is acceptable for this type.
    ///
    /// Integers are accepted where floats are expected.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Float => value.is_number(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::List => value.is_array(),
            ArgType::Object => value.is_object(),
            ArgType::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Float => "float",
            ArgType::Boolean => "boolean",
            ArgType::List => "list",
            ArgType::Object => "object",
            ArgType::Any => "any",
        }
    }
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One positional/keyword argument of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

impl ToolArgument {
    /// A required argument.
    pub fn required(name: impl Into<String>, arg_type: ArgType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    /// An optional argument with a default value.
    pub fn optional(
        name: impl Into<String>,
        arg_type: ArgType,
        default: serde_json::Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: false,
            default: Some(default),
            description: description.into(),
        }
    }
}

/// The complete, explicit description of a tool.
///
/// Argument order is significant: positional arguments in an action bind
/// to `arguments` in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub toolbox: String,
    pub description: String,
    pub arguments: Vec<ToolArgument>,
    pub return_type: String,
    /// When set, the executor must obtain user approval before every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    /// Whether the current context variables are passed as [`ToolContext`].
    #[serde(default)]
    pub inject_context: bool,
    /// Per-call time limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl ToolDefinition {
    /// Start building a definition in the `default` toolbox.
    pub fn builder(name: impl Into<String>) -> ToolDefinitionBuilder {
        ToolDefinitionBuilder {
            definition: ToolDefinition {
                name: name.into(),
                toolbox: "default".into(),
                description: String::new(),
                arguments: Vec::new(),
                return_type: "any".into(),
                confirmation: None,
                inject_context: false,
                timeout: None,
            },
        }
    }

    /// `toolbox.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.toolbox, self.name)
    }

    pub fn needs_confirmation(&self) -> bool {
        self.confirmation.is_some()
    }

    pub fn argument(&self, name: &str) -> Option<&ToolArgument> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Check the schema invariants enforced at registration.
    pub fn validate(&self) -> Result<(), ToolError> {
        let reject = |reason: String| ToolError::Registration {
            tool_name: self.qualified_name(),
            reason,
        };

        if !is_identifier(&self.name) {
            return Err(reject(format!("'{}' is not a valid tool name", self.name)));
        }
        if !is_identifier(&self.toolbox) {
            return Err(reject(format!("'{}' is not a valid toolbox name", self.toolbox)));
        }

        let mut seen = std::collections::HashSet::new();
        for arg in &self.arguments {
            if !is_identifier(&arg.name) {
                return Err(reject(format!("'{}' is not a valid argument name", arg.name)));
            }
            if !seen.insert(arg.name.as_str()) {
                return Err(reject(format!("duplicate argument '{}'", arg.name)));
            }
            match (&arg.default, arg.required) {
                (Some(_), true) => {
                    return Err(reject(format!(
                        "required argument '{}' cannot have a default",
                        arg.name
                    )));
                }
                (Some(default), false) if !default.is_null() && !arg.arg_type.accepts(default) => {
                    return Err(reject(format!(
                        "default for '{}' is not a {}",
                        arg.name, arg.arg_type
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Render the signature and description shown to the language model.
    pub fn render_doc(&self) -> String {
        let params: Vec<String> = self
            .arguments
            .iter()
            .map(|a| match &a.default {
                Some(default) if !a.required => format!("{}: {} = {}", a.name, a.arg_type, default),
                _ => format!("{}: {}", a.name, a.arg_type),
            })
            .collect();

        let mut out = format!(
            "{}({}) -> {}\n",
            self.qualified_name(),
            params.join(", "),
            self.return_type
        );
        if !self.description.is_empty() {
            out.push_str(&format!("    {}\n", self.description));
        }
        for arg in &self.arguments {
            let req = if arg.required { "required" } else { "optional" };
            if arg.description.is_empty() {
                out.push_str(&format!("    - {} ({}, {})\n", arg.name, arg.arg_type, req));
            } else {
                out.push_str(&format!(
                    "    - {} ({}, {}): {}\n",
                    arg.name, arg.arg_type, req, arg.description
                ));
            }
        }
        if self.needs_confirmation() {
            out.push_str("    Requires user confirmation; a denial ends the current action.\n");
        }
        out
    }
}

/// Builder for [`ToolDefinition`].
#[derive(Debug, Clone)]
pub struct ToolDefinitionBuilder {
    definition: ToolDefinition,
}

impl ToolDefinitionBuilder {
    pub fn toolbox(mut self, toolbox: impl Into<String>) -> Self {
        self.definition.toolbox = toolbox.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = description.into();
        self
    }

    pub fn argument(mut self, argument: ToolArgument) -> Self {
        self.definition.arguments.push(argument);
        self
    }

    pub fn returns(mut self, return_type: impl Into<String>) -> Self {
        self.definition.return_type = return_type.into();
        self
    }

    pub fn confirmation(mut self, message: impl Into<String>) -> Self {
        self.definition.confirmation = Some(message.into());
        self
    }

    pub fn inject_context(mut self, inject: bool) -> Self {
        self.definition.inject_context = inject;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.definition.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ToolDefinition {
        self.definition
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Invocation ────────────────────────────────────────────────────────────

/// Shared execution context handed to tools that ask for it.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Snapshot of the action's variables at call time.
    pub variables: ContextVariables,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: Some(data),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }

    /// The value an action sees: structured data when present, text otherwise.
    pub fn into_value(self) -> serde_json::Value {
        self.data.unwrap_or(serde_json::Value::String(self.output))
    }
}

/// The core Tool trait.
///
/// Each tool declares its schema through [`Tool::definition`] and receives
/// already-bound, type-checked arguments as a JSON object.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The explicit schema of this tool.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: Option<&ToolContext>,
    ) -> std::result::Result<ToolResult, ToolError>;
}

// ── Overrides ─────────────────────────────────────────────────────────────

/// Per-tool configuration applied at registration without touching the
/// tool's source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject_context: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_confirmation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_message: Option<String>,
    /// Default values for named arguments; makes them optional.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub defaults: serde_json::Map<String, serde_json::Value>,
}

impl ToolOverride {
    pub fn is_disabled(&self) -> bool {
        self.enabled == Some(false)
    }

    /// Apply this override to a definition.
    pub fn apply(&self, mut definition: ToolDefinition) -> Result<ToolDefinition, ToolError> {
        if let Some(inject) = self.inject_context {
            definition.inject_context = inject;
        }
        if let Some(secs) = self.timeout_secs {
            definition.timeout = Some(Duration::from_secs(secs));
        }
        match (self.needs_confirmation, &self.confirmation_message) {
            (Some(false), _) => definition.confirmation = None,
            (Some(true), Some(message)) | (None, Some(message)) => {
                definition.confirmation = Some(message.clone());
            }
            (Some(true), None) if definition.confirmation.is_none() => {
                definition.confirmation =
                    Some(format!("Allow {} to run?", definition.qualified_name()));
            }
            _ => {}
        }
        for (name, value) in &self.defaults {
            let qualified = definition.qualified_name();
            let arg = definition
                .arguments
                .iter_mut()
                .find(|a| &a.name == name)
                .ok_or_else(|| ToolError::Registration {
                    tool_name: qualified,
                    reason: format!("override sets default for unknown argument '{name}'"),
                })?;
            arg.required = false;
            arg.default = Some(value.clone());
        }
        Ok(definition)
    }
}

// ── Registry ──────────────────────────────────────────────────────────────

/// A tool together with its validated, effective definition.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: Arc<ToolDefinition>,
    pub tool: Arc<dyn Tool>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition.qualified_name())
            .finish()
    }
}

/// An immutable snapshot of the registry, grouped by toolbox.
///
/// The executor builds one per action so a concurrent registration can never
/// change the tools visible halfway through a step.
#[derive(Debug, Clone, Default)]
pub struct ToolNamespace {
    toolboxes: Arc<BTreeMap<String, BTreeMap<String, RegisteredTool>>>,
}

impl ToolNamespace {
    pub fn has_toolbox(&self, toolbox: &str) -> bool {
        self.toolboxes.contains_key(toolbox)
    }

    pub fn get(&self, toolbox: &str, name: &str) -> Option<&RegisteredTool> {
        self.toolboxes.get(toolbox)?.get(name)
    }

    pub fn toolboxes(&self) -> impl Iterator<Item = &str> {
        self.toolboxes.keys().map(|s| s.as_str())
    }

    pub fn tools(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.toolboxes.values().flat_map(|tb| tb.values())
    }

    pub fn len(&self) -> usize {
        self.toolboxes.values().map(|tb| tb.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Documentation for every tool, grouped by toolbox.
    pub fn render_docs(&self) -> String {
        let mut out = String::new();
        for (toolbox, tools) in self.toolboxes.iter() {
            out.push_str(&format!("## toolbox `{toolbox}`\n"));
            for registered in tools.values() {
                out.push_str(&registered.definition.render_doc());
            }
            out.push('\n');
        }
        out
    }
}

/// A registry of available tools.
///
/// Read-mostly: lookups take a shared lock, registration takes the single
/// writer lock. Tools cannot be replaced once registered.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with its own definition.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        self.register_with(tool, None)
    }

    /// Register a tool, applying a configuration override first.
    ///
    /// Returns `Ok(())` without registering when the override disables the tool.
    pub fn register_with(
        &self,
        tool: Arc<dyn Tool>,
        overrides: Option<&ToolOverride>,
    ) -> Result<(), ToolError> {
        let mut definition = tool.definition();
        if let Some(ov) = overrides {
            if ov.is_disabled() {
                tracing::debug!(tool = %definition.qualified_name(), "Tool disabled by configuration");
                return Ok(());
            }
            definition = ov.apply(definition)?;
        }
        definition.validate()?;

        let key = definition.qualified_name();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&key) {
            return Err(ToolError::Registration {
                tool_name: key,
                reason: "a tool with this name is already registered".into(),
            });
        }
        tracing::debug!(tool = %key, "Tool registered");
        tools.insert(
            key,
            RegisteredTool {
                definition: Arc::new(definition),
                tool,
            },
        );
        Ok(())
    }

    /// Get a tool by toolbox and name.
    pub fn get(&self, toolbox: &str, name: &str) -> Option<RegisteredTool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&format!("{toolbox}.{name}"))
            .cloned()
    }

    /// Take an immutable snapshot for one execution.
    pub fn namespace(&self) -> ToolNamespace {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut grouped: BTreeMap<String, BTreeMap<String, RegisteredTool>> = BTreeMap::new();
        for registered in tools.values() {
            grouped
                .entry(registered.definition.toolbox.clone())
                .or_default()
                .insert(registered.definition.name.clone(), registered.clone());
        }
        ToolNamespace {
            toolboxes: Arc::new(grouped),
        }
    }

    /// All effective definitions.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.definition.as_ref().clone())
            .collect()
    }

    /// List all registered tool names as `toolbox.name`.
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::builder("echo")
                .toolbox("util")
                .description("Echoes back the input")
                .argument(ToolArgument::required("text", ArgType::String, "Text to echo"))
                .argument(ToolArgument::optional(
                    "times",
                    ArgType::Integer,
                    serde_json::json!(1),
                    "Repetitions",
                ))
                .returns("string")
                .build()
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
            _context: Option<&ToolContext>,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            let times = arguments["times"].as_u64().unwrap_or(1) as usize;
            Ok(ToolResult::ok(text.repeat(times)))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        assert!(registry.get("util", "echo").is_some());
        assert!(registry.get("util", "nonexistent").is_none());
        assert_eq!(registry.names(), vec!["util.echo".to_string()]);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::Registration { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn override_disables_tool() {
        let registry = ToolRegistry::new();
        let ov = ToolOverride {
            enabled: Some(false),
            ..Default::default()
        };
        registry.register_with(Arc::new(EchoTool), Some(&ov)).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn override_applies_defaults_and_flags() {
        let registry = ToolRegistry::new();
        let mut defaults = serde_json::Map::new();
        defaults.insert("text".into(), serde_json::json!("hi"));
        let ov = ToolOverride {
            inject_context: Some(true),
            timeout_secs: Some(5),
            needs_confirmation: Some(true),
            defaults,
            ..Default::default()
        };
        registry.register_with(Arc::new(EchoTool), Some(&ov)).unwrap();

        let registered = registry.get("util", "echo").unwrap();
        let def = &registered.definition;
        assert!(def.inject_context);
        assert_eq!(def.timeout, Some(Duration::from_secs(5)));
        assert!(def.needs_confirmation());
        let text = def.argument("text").unwrap();
        assert!(!text.required);
        assert_eq!(text.default, Some(serde_json::json!("hi")));
    }

    #[test]
    fn override_for_unknown_argument_rejected() {
        let registry = ToolRegistry::new();
        let mut defaults = serde_json::Map::new();
        defaults.insert("missing".into(), serde_json::json!(1));
        let ov = ToolOverride {
            defaults,
            ..Default::default()
        };
        assert!(registry.register_with(Arc::new(EchoTool), Some(&ov)).is_err());
    }

    #[test]
    fn validation_rejects_bad_schemas() {
        let bad_name = ToolDefinition::builder("not valid").build();
        assert!(bad_name.validate().is_err());

        let dup = ToolDefinition::builder("t")
            .argument(ToolArgument::required("a", ArgType::String, ""))
            .argument(ToolArgument::required("a", ArgType::String, ""))
            .build();
        assert!(dup.validate().is_err());

        let bad_default = ToolDefinition::builder("t")
            .argument(ToolArgument::optional("n", ArgType::Integer, serde_json::json!("x"), ""))
            .build();
        assert!(bad_default.validate().is_err());
    }

    #[test]
    fn namespace_groups_by_toolbox() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let ns = registry.namespace();
        assert!(ns.has_toolbox("util"));
        assert!(!ns.has_toolbox("default"));
        assert_eq!(ns.len(), 1);

        let docs = ns.render_docs();
        assert!(docs.contains("util.echo(text: string, times: integer = 1) -> string"));
        assert!(docs.contains("Echoes back the input"));
    }

    #[test]
    fn snapshot_is_isolated_from_later_registrations() {
        struct Other;
        #[async_trait]
        impl Tool for Other {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition::builder("other").toolbox("util").build()
            }
            async fn execute(
                &self,
                _arguments: serde_json::Value,
                _context: Option<&ToolContext>,
            ) -> std::result::Result<ToolResult, ToolError> {
                Ok(ToolResult::ok(""))
            }
        }

        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let before = registry.namespace();
        registry.register(Arc::new(Other)).unwrap();
        assert!(before.get("util", "other").is_none());
        assert!(registry.namespace().get("util", "other").is_some());
    }

    #[tokio::test]
    async fn tool_execute_returns_value() {
        let tool = EchoTool;
        let result = tool
            .execute(serde_json::json!({"text": "ab", "times": 2}), None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.into_value(), serde_json::json!("abab"));
    }
}
