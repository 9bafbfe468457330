//! Configuration loading and validation for CodeAct.
//!
//! Settings come from a TOML file, a plain key/value map, or defaults, and
//! may be overridden from the environment. They are validated once, before
//! an agent is built, and never re-read during a run.

use codeact_core::ToolOverride;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Modules action code may import unless configured otherwise.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &["math", "text", "json", "time"];

/// The root settings structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model identifier sent to the language model service
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Reasoning-execution cycles per task
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Token budget for the step history rendered into each prompt
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,

    /// Stream model output and emit token events
    #[serde(default)]
    pub stream: bool,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub reasoner: ReasonerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Per-tool overrides keyed by `toolbox.name` or bare tool name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, ToolOverride>,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_max_iterations() -> u32 {
    20
}
fn default_max_history_tokens() -> usize {
    8000
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AgentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSettings")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_iterations", &self.max_iterations)
            .field("max_history_tokens", &self.max_history_tokens)
            .field("stream", &self.stream)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("reasoner", &self.reasoner)
            .field("executor", &self.executor)
            .field("confirmation", &self.confirmation)
            .field("security", &self.security)
            .field("conversation", &self.conversation)
            .field("provider", &self.provider)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Attempts per step before giving up with a reasoning failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl ReasonerConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Wall-clock limit for one action. Time spent waiting on a
    /// confirmation does not count.
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,

    /// Modules action code may import
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,

    /// Interpreter operation budget per action
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Printed output kept per action; the rest is truncated
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_exec_timeout() -> u64 {
    30
}
fn default_allowed_modules() -> Vec<String> {
    DEFAULT_ALLOWED_MODULES.iter().map(|m| m.to_string()).collect()
}
fn default_max_operations() -> u64 {
    100_000
}
fn default_max_output_chars() -> usize {
    10_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout(),
            allowed_modules: default_allowed_modules(),
            max_operations: default_max_operations(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// How long to wait for the user; no answer in time means "deny".
    /// `None` waits indefinitely.
    #[serde(default = "default_confirmation_timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_confirmation_timeout() -> Option<u64> {
    Some(60)
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_confirmation_timeout(),
        }
    }
}

impl ConfirmationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Security violations tolerated within one task before it is aborted
    #[serde(default = "default_max_violations")]
    pub max_violations: u32,

    /// Root directory for the file and shell tools. Relative tool paths
    /// resolve against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    /// Confine file tools to `workspace` (and `allowed_roots`)
    #[serde(default = "default_true")]
    pub workspace_only: bool,

    /// Extra directories file tools may use when confined
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_roots: Vec<String>,

    /// Programs `shell.run` may start; unset means the built-in safe list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,

    /// Paths file tools may never touch, on top of the built-in ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_paths: Vec<String>,
}

fn default_max_violations() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_violations: default_max_violations(),
            workspace: None,
            workspace_only: default_true(),
            allowed_roots: Vec::new(),
            allowed_commands: None,
            forbidden_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Oldest messages are dropped beyond this count
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    200
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl AgentSettings {
    /// Load settings from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Self::from_toml_str(&content).map_err(|e| match e {
                ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                    path: path.to_path_buf(),
                    reason,
                },
                other => other,
            })?
        } else {
            tracing::info!("No settings file found at {}, using defaults", path.display());
            Self::default()
        };

        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from a plain key/value structure.
    ///
    /// Keys may be nested maps or dotted paths (`"executor.timeout_secs"`).
    pub fn from_map(
        entries: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<Self, ConfigError> {
        let mut root = serde_json::Map::new();
        for (key, value) in entries {
            insert_dotted(&mut root, &key, value)?;
        }
        let settings: Self = serde_json::from_value(serde_json::Value::Object(root))
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `CODEACT_*` overrides from an environment lookup.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("CODEACT_MODEL") {
            self.model = model;
        }
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("CODEACT_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(raw) = lookup("CODEACT_MAX_ITERATIONS") {
            match raw.trim().parse() {
                Ok(n) => self.max_iterations = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid CODEACT_MAX_ITERATIONS"),
            }
        }
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.max_history_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_history_tokens must be > 0".into(),
            ));
        }
        if self.reasoner.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "reasoner.max_retries must be at least 1".into(),
            ));
        }
        if self.executor.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "executor.timeout_secs must be > 0".into(),
            ));
        }
        if self.executor.max_operations == 0 {
            return Err(ConfigError::ValidationError(
                "executor.max_operations must be > 0".into(),
            ));
        }
        if let Some(bad) = self
            .executor
            .allowed_modules
            .iter()
            .find(|m| m.is_empty() || !m.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ConfigError::ValidationError(format!(
                "'{bad}' is not a valid module name"
            )));
        }
        if self.conversation.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.max_messages must be > 0".into(),
            ));
        }
        if let Some(workspace) = &self.security.workspace {
            if !workspace.is_dir() {
                return Err(ConfigError::ValidationError(format!(
                    "security.workspace '{}' is not a directory",
                    workspace.display()
                )));
            }
        }
        let commands = self.security.allowed_commands.iter().flatten();
        if commands.chain(&self.security.forbidden_paths).any(|c| c.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "security.allowed_commands and security.forbidden_paths may not contain empty entries"
                    .into(),
            ));
        }
        Ok(())
    }

    /// The override for a tool, by qualified name first, then bare name.
    pub fn tool_override(&self, toolbox: &str, name: &str) -> Option<&ToolOverride> {
        self.tools
            .get(&format!("{toolbox}.{name}"))
            .or_else(|| self.tools.get(name))
    }

    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Default settings as TOML.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            max_history_tokens: default_max_history_tokens(),
            stream: false,
            system_prompt: None,
            reasoner: ReasonerConfig::default(),
            executor: ExecutorConfig::default(),
            confirmation: ConfirmationConfig::default(),
            security: SecurityConfig::default(),
            conversation: ConversationConfig::default(),
            provider: ProviderConfig::default(),
            tools: BTreeMap::new(),
        }
    }
}

fn insert_dotted(
    root: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    value: serde_json::Value,
) -> Result<(), ConfigError> {
    // Tool overrides are keyed by qualified names that themselves contain dots
    if let Some(tool) = key.strip_prefix("tools.") {
        let tools = root
            .entry("tools")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        return match tools {
            serde_json::Value::Object(map) => {
                map.insert(tool.to_string(), value);
                Ok(())
            }
            _ => Err(ConfigError::ValidationError("'tools' must be a map".into())),
        };
    }

    match key.split_once('.') {
        None => {
            root.insert(key.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = root
                .entry(head)
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            match child {
                serde_json::Value::Object(map) => insert_dotted(map, rest, value),
                _ => Err(ConfigError::ValidationError(format!(
                    "'{head}' is set both as a value and as a section"
                ))),
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for codeact_core::Error {
    fn from(e: ConfigError) -> Self {
        codeact_core::Error::Config {
            message: e.to_string(),
        }
    }
}
