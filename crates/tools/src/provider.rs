//! Tool discovery.
//!
//! A [`ToolProvider`] is a package of tools (the built-ins, a host
//! application's own functions, a plugin). The loader collects tools from
//! every provider, applies per-tool overrides from the settings, validates
//! each schema and registers the survivors. One bad tool does not stop the
//! others from loading.

use codeact_config::{AgentSettings, SecurityConfig};
use codeact_core::{Tool, ToolError, ToolRegistry};
use codeact_security::PathPolicy;
use std::sync::Arc;

use crate::calculator::CalculatorTool;
use crate::file_read::FileReadTool;
use crate::file_write::FileWriteTool;
use crate::shell::ShellTool;

/// A source of tools.
pub trait ToolProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Providers with higher priority load first and so win name clashes.
    fn priority(&self) -> i32 {
        0
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>>;
}

/// A provider over a fixed list of tools.
#[derive(Default)]
pub struct StaticProvider {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    priority: i32,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl ToolProvider for StaticProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }
}

/// The built-in tools: calculator, file read/write, shell.
pub struct BuiltinProvider {
    pub paths: PathPolicy,
    pub shell_commands: Vec<String>,
}

impl Default for BuiltinProvider {
    fn default() -> Self {
        Self {
            paths: PathPolicy::unrestricted(),
            shell_commands: crate::shell::SAFE_COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl BuiltinProvider {
    /// Path and command boundaries from the `[security]` settings.
    pub fn from_settings(security: &SecurityConfig) -> Self {
        let paths = match &security.workspace {
            Some(root) if security.workspace_only => security
                .allowed_roots
                .iter()
                .fold(PathPolicy::workspace(root), |policy, extra| policy.allow_root(extra.as_str())),
            Some(root) => PathPolicy::relative_to(root),
            None => PathPolicy::unrestricted(),
        }
        .forbid(security.forbidden_paths.iter().cloned());

        let shell_commands = match &security.allowed_commands {
            Some(commands) => commands.clone(),
            None => Self::default().shell_commands,
        };
        Self {
            paths,
            shell_commands,
        }
    }
}

impl ToolProvider for BuiltinProvider {
    fn provider_name(&self) -> &str {
        "builtin"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut shell = ShellTool::new(self.shell_commands.clone());
        if let Some(dir) = &self.paths.workspace {
            shell = shell.in_dir(dir);
        }
        vec![
            Arc::new(CalculatorTool),
            Arc::new(FileReadTool::new(self.paths.clone())),
            Arc::new(FileWriteTool::new(self.paths.clone())),
            Arc::new(shell),
        ]
    }
}

/// What happened to each discovered tool.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub registered: Vec<String>,
    pub disabled: Vec<String>,
    pub rejected: Vec<(String, ToolError)>,
}

/// Register every tool from `providers`, applying overrides from `settings`.
pub fn load_providers(
    registry: &ToolRegistry,
    providers: &[&dyn ToolProvider],
    settings: &AgentSettings,
) -> LoadReport {
    let mut ordered: Vec<&&dyn ToolProvider> = providers.iter().collect();
    ordered.sort_by_key(|p| std::cmp::Reverse(p.priority()));

    let mut report = LoadReport::default();
    for provider in ordered {
        for tool in provider.tools() {
            let definition = tool.definition();
            let name = definition.qualified_name();
            let overrides = settings.tool_override(&definition.toolbox, &definition.name);

            if overrides.is_some_and(|o| o.is_disabled()) {
                tracing::debug!(tool = %name, provider = provider.provider_name(), "Tool disabled");
                report.disabled.push(name);
                continue;
            }

            match registry.register_with(tool, overrides) {
                Ok(()) => report.registered.push(name),
                Err(e) => {
                    tracing::warn!(
                        tool = %name,
                        provider = provider.provider_name(),
                        error = %e,
                        "Tool rejected"
                    );
                    report.rejected.push((name, e));
                }
            }
        }
    }
    report
}

/// A registry with the built-in tools, overrides from `settings` applied.
pub fn default_registry(settings: &AgentSettings) -> ToolRegistry {
    let registry = ToolRegistry::new();
    let builtins = BuiltinProvider::from_settings(&settings.security);
    let report = load_providers(&registry, &[&builtins], settings);
    tracing::debug!(
        registered = report.registered.len(),
        disabled = report.disabled.len(),
        "Default tool registry ready"
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnTool;
    use codeact_core::{ArgType, ToolArgument, ToolDefinition, ToolOverride};
    use serde_json::json;

    fn constant_tool(toolbox: &str, name: &str, value: i64) -> FnTool {
        FnTool::sync(
            ToolDefinition::builder(name).toolbox(toolbox).returns("integer").build(),
            move |_| Ok(json!(value)),
        )
    }

    #[test]
    fn default_registry_has_builtins() {
        let registry = default_registry(&AgentSettings::default());
        let names = registry.names();
        for expected in ["calculator.calculate", "files.read", "files.write", "shell.run"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn security_settings_bound_the_builtins() {
        let workspace = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("notes.txt"), "inside").unwrap();
        std::fs::write(outside.path().join("notes.txt"), "outside").unwrap();

        let mut settings = AgentSettings::default();
        settings.security.workspace = Some(workspace.path().to_path_buf());
        settings.security.allowed_commands = Some(vec!["echo".into()]);
        let registry = default_registry(&settings);

        let read = registry.get("files", "read").unwrap().tool;
        let inside = read.execute(json!({"path": "notes.txt"}), None).await.unwrap();
        assert_eq!(inside.into_value(), json!("inside"));
        let path = outside.path().join("notes.txt").display().to_string();
        assert!(read.execute(json!({"path": path}), None).await.is_err());

        let shell = registry.get("shell", "run").unwrap().tool;
        assert!(shell.execute(json!({"command": "ls"}), None).await.is_err());
    }

    #[test]
    fn unconfined_workspace_only_sets_the_base_directory() {
        let workspace = tempfile::tempdir().unwrap();
        let security = SecurityConfig {
            workspace: Some(workspace.path().to_path_buf()),
            workspace_only: false,
            forbidden_paths: vec!["/srv/secrets".into()],
            ..SecurityConfig::default()
        };
        let provider = BuiltinProvider::from_settings(&security);
        assert!(provider.paths.allowed_roots.is_empty());
        assert!(provider.paths.workspace.is_some());
        assert!(provider.paths.forbidden_paths.contains(&"/srv/secrets".to_string()));
        assert_eq!(provider.shell_commands, BuiltinProvider::default().shell_commands);
    }

    #[test]
    fn overrides_disable_and_reconfigure() {
        let mut settings = AgentSettings::default();
        settings.tools.insert(
            "shell.run".into(),
            ToolOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        settings.tools.insert(
            "write".into(),
            ToolOverride {
                needs_confirmation: Some(false),
                ..Default::default()
            },
        );

        let registry = ToolRegistry::new();
        let report = load_providers(&registry, &[&BuiltinProvider::default()], &settings);
        assert_eq!(report.disabled, vec!["shell.run".to_string()]);
        assert!(registry.get("shell", "run").is_none());
        assert!(!registry.get("files", "write").unwrap().definition.needs_confirmation());
    }

    #[test]
    fn invalid_tools_are_rejected_individually() {
        let bad = FnTool::sync(
            ToolDefinition::builder("bad")
                .toolbox("plugin")
                .argument(ToolArgument::optional("n", ArgType::Integer, json!("text"), ""))
                .build(),
            |_| Ok(json!(null)),
        );
        let provider = StaticProvider::new("plugin")
            .with_tool(bad)
            .with_tool(constant_tool("plugin", "good", 1));

        let registry = ToolRegistry::new();
        let report = load_providers(&registry, &[&provider], &AgentSettings::default());
        assert_eq!(report.registered, vec!["plugin.good".to_string()]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "plugin.bad");
    }

    #[tokio::test]
    async fn higher_priority_provider_wins_clash() {
        let low = StaticProvider::new("low").with_tool(constant_tool("x", "value", 1));
        let high = StaticProvider::new("high")
            .with_priority(10)
            .with_tool(constant_tool("x", "value", 2));

        let registry = ToolRegistry::new();
        let report = load_providers(&registry, &[&low, &high], &AgentSettings::default());
        assert_eq!(report.rejected.len(), 1);

        let tool = registry.get("x", "value").unwrap();
        let result = tool.tool.execute(json!({}), None).await.unwrap();
        assert_eq!(result.into_value(), json!(2));
    }
}
