//! Importable modules and runnable commands.
//!
//! Generated action code may only import modules on the configured list;
//! the check runs statically, before any code executes. The shell tool uses
//! the same deny-by-default shape for command names.

use std::collections::BTreeSet;

/// Result of checking a name against an allowlist.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// Name is allowed
    Allowed,
    /// Name is denied
    Denied { name: String, reason: String },
}

impl CheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CheckResult::Allowed)
    }
}

/// The set of modules action code may import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAllowlist {
    modules: BTreeSet<String>,
}

impl ModuleAllowlist {
    pub fn new<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    /// Check one import.
    ///
    /// Dotted imports are judged by their top-level package, so allowing
    /// `math` does not allow `os.path` and allowing `os` would allow both
    /// `os` and `os.path`.
    pub fn check(&self, module: &str) -> CheckResult {
        let top = module.split('.').next().unwrap_or(module);
        if self.modules.contains(top) {
            CheckResult::Allowed
        } else {
            CheckResult::Denied {
                name: module.into(),
                reason: format!(
                    "import of '{}' is not allowed (allowed: {})",
                    module,
                    self.describe()
                ),
            }
        }
    }

    /// The first disallowed module among `imports`, in source order.
    pub fn first_violation<'a>(&self, imports: impl IntoIterator<Item = &'a str>) -> Option<CheckResult> {
        imports
            .into_iter()
            .map(|m| self.check(m))
            .find(|r| !r.is_allowed())
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|s| s.as_str())
    }

    /// Comma-separated list for prompts and error messages.
    pub fn describe(&self) -> String {
        if self.modules.is_empty() {
            return "none".into();
        }
        self.modules.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Unified allowlist policy enforcement.
pub struct AllowlistPolicy;

impl AllowlistPolicy {
    /// Check a shell command line against the allowed command names.
    ///
    /// Rules:
    /// - If `allowed_commands` is empty → deny all (secure by default)
    /// - If `allowed_commands` contains `"*"` → allow all
    /// - Otherwise the program name (first word) must be in the list
    /// - Command chaining, pipes, redirection and substitution are always denied
    pub fn check_command(command: &str, allowed_commands: &[String]) -> CheckResult {
        let trimmed = command.trim();
        let program = trimmed.split_whitespace().next().unwrap_or("");

        if program.is_empty() {
            return CheckResult::Denied {
                name: command.into(),
                reason: "Empty command".into(),
            };
        }

        if let Some(op) = ["&&", "||", ";", "|", "`", "$(", ">", "<"]
            .iter()
            .find(|op| trimmed.contains(**op))
        {
            return CheckResult::Denied {
                name: command.into(),
                reason: format!("Shell operator '{op}' is not permitted"),
            };
        }

        if allowed_commands.is_empty() {
            return CheckResult::Denied {
                name: program.into(),
                reason: "No commands configured (deny by default)".into(),
            };
        }

        if allowed_commands.iter().any(|c| c == "*" || c == program) {
            CheckResult::Allowed
        } else {
            CheckResult::Denied {
                name: program.into(),
                reason: format!(
                    "Command '{}' not in allowlist ({} commands configured)",
                    program,
                    allowed_commands.len()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_modules() -> ModuleAllowlist {
        ModuleAllowlist::new(["math", "text", "json", "time"])
    }

    #[test]
    fn allowed_module_passes() {
        assert!(default_modules().check("math").is_allowed());
        assert!(default_modules().check("json").is_allowed());
    }

    #[test]
    fn unknown_module_denied() {
        match default_modules().check("os") {
            CheckResult::Denied { name, reason } => {
                assert_eq!(name, "os");
                assert!(reason.contains("math"));
            }
            _ => panic!("Expected denied"),
        }
    }

    #[test]
    fn dotted_import_judged_by_top_level() {
        let list = ModuleAllowlist::new(["os"]);
        assert!(list.check("os.path").is_allowed());
        assert!(!default_modules().check("os.path").is_allowed());
        assert!(!default_modules().check("mathx").is_allowed());
    }

    #[test]
    fn empty_allowlist_denies_all() {
        let list = ModuleAllowlist::default();
        assert!(!list.check("math").is_allowed());
        assert_eq!(list.describe(), "none");
    }

    #[test]
    fn first_violation_in_source_order() {
        let violation = default_modules().first_violation(["math", "subprocess", "socket"]);
        match violation {
            Some(CheckResult::Denied { name, .. }) => assert_eq!(name, "subprocess"),
            other => panic!("Expected subprocess violation, got {other:?}"),
        }
        assert!(default_modules().first_violation(["math", "time"]).is_none());
    }

    #[test]
    fn empty_commands_denies_all() {
        let result = AllowlistPolicy::check_command("ls -la", &[]);
        assert_eq!(
            result,
            CheckResult::Denied {
                name: "ls".into(),
                reason: "No commands configured (deny by default)".into(),
            }
        );
    }

    #[test]
    fn listed_command_allowed() {
        let allowed = vec!["ls".into(), "echo".into()];
        assert!(AllowlistPolicy::check_command("echo hello", &allowed).is_allowed());
        assert!(!AllowlistPolicy::check_command("rm -rf /", &allowed).is_allowed());
    }

    #[test]
    fn wildcard_allows_any_program() {
        let allowed = vec!["*".into()];
        assert!(AllowlistPolicy::check_command("uname -a", &allowed).is_allowed());
    }

    #[test]
    fn chaining_denied_even_with_wildcard() {
        let allowed = vec!["*".into()];
        for cmd in ["ls && rm x", "echo a | sh", "echo $(id)", "cat a > b", "ls; id"] {
            match AllowlistPolicy::check_command(cmd, &allowed) {
                CheckResult::Denied { reason, .. } => assert!(reason.contains("operator")),
                _ => panic!("Expected {cmd} to be denied"),
            }
        }
    }
}
