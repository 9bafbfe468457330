//! Keeps file tools inside a workspace root.
//!
//! Ensures file tools can only touch paths inside a workspace (or other
//! allowed roots) and never reach forbidden locations such as `~/.ssh`.

use std::path::{Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Locations no file tool may touch, whatever the allowed roots say.
pub const DEFAULT_FORBIDDEN: &[&str] = &["/etc", "/proc", "/sys", "~/.ssh", "~/.gnupg", "~/.aws"];

/// Where file tools may read and write.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    /// Relative paths resolve against this directory.
    pub workspace: Option<PathBuf>,
    /// Empty means "anywhere not forbidden".
    pub allowed_roots: Vec<String>,
    pub forbidden_paths: Vec<String>,
}

impl PathPolicy {
    /// Confine access to `workspace` and the default forbidden list.
    pub fn workspace(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let canonical = root.canonicalize().unwrap_or_else(|_| root.clone());
        Self {
            allowed_roots: vec![canonical.to_string_lossy().into_owned()],
            workspace: Some(canonical),
            forbidden_paths: DEFAULT_FORBIDDEN.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Forbidden list only; relative paths resolve against the process cwd.
    pub fn unrestricted() -> Self {
        Self {
            workspace: None,
            allowed_roots: Vec::new(),
            forbidden_paths: DEFAULT_FORBIDDEN.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Resolve relative paths against `root` without confining access to it.
    pub fn relative_to(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            workspace: Some(root.canonicalize().unwrap_or(root)),
            ..Self::unrestricted()
        }
    }

    /// Also allow paths under `root`. A policy with any allowed root rejects
    /// everything outside its roots.
    pub fn allow_root(mut self, root: impl Into<String>) -> Self {
        self.allowed_roots.push(root.into());
        self
    }

    /// Forbid `paths` on top of the existing list.
    pub fn forbid<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            let path = path.into();
            if !self.forbidden_paths.contains(&path) {
                self.forbidden_paths.push(path);
            }
        }
        self
    }

    /// Validate `path`, returning the resolved location on success.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        let joined = match &self.workspace {
            Some(root) if Path::new(path).is_relative() => root.join(path).to_string_lossy().into_owned(),
            _ => path.to_string(),
        };
        // Traversal is judged on what the caller wrote, not on the joined path
        check_traversal(path)?;
        validate_path(&joined, &self.allowed_roots, &self.forbidden_paths)
    }
}

fn check_traversal(path: &str) -> Result<(), PathValidationError> {
    let path_str = path.replace('\\', "/");
    if path_str.contains("../") || path_str.contains("/..") || path_str == ".." {
        return Err(PathValidationError::PathTraversal { path: path.into() });
    }
    Ok(())
}

/// Validate that a path is safe to access.
///
/// Checks:
/// 1. No path traversal (`..` segments)
/// 2. Path is canonicalized to resolve symlinks (the parent, for new files)
/// 3. Path is not under a forbidden path
/// 4. Path is within allowed roots (if any are given)
///
/// Returns the canonicalized path on success.
pub fn validate_path(
    path: &str,
    allowed_roots: &[String],
    forbidden_paths: &[String],
) -> Result<PathBuf, PathValidationError> {
    check_traversal(path)?;
    let input_path = Path::new(path);

    // A file that doesn't exist yet (a write target) is resolved via its parent
    let canonical = if input_path.exists() {
        input_path
            .canonicalize()
            .map_err(|e| PathValidationError::CanonicalizeFailed {
                path: path.into(),
                reason: e.to_string(),
            })?
    } else if let Some(parent) = input_path.parent()
        && parent.exists()
    {
        let canonical_parent =
            parent
                .canonicalize()
                .map_err(|e| PathValidationError::CanonicalizeFailed {
                    path: path.into(),
                    reason: format!("Parent dir: {e}"),
                })?;
        canonical_parent.join(input_path.file_name().unwrap_or_default())
    } else {
        input_path.to_path_buf()
    };

    let canonical_str = normalize(&canonical.to_string_lossy());

    for forbidden in forbidden_paths {
        if is_under(&canonical_str, &normalize(&expand_tilde(forbidden))) {
            return Err(PathValidationError::ForbiddenPath {
                path: path.into(),
                pattern: forbidden.clone(),
            });
        }
    }

    if !allowed_roots.is_empty()
        && !allowed_roots
            .iter()
            .any(|root| is_under(&canonical_str, &normalize(&expand_tilde(root))))
    {
        return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
    }

    Ok(canonical)
}

/// Forward slashes, lowercase, no Windows extended-length prefix.
fn normalize(path: &str) -> String {
    let s = path.replace('\\', "/").to_lowercase();
    s.strip_prefix("//?/").unwrap_or(&s).trim_end_matches('/').to_string()
}

/// Component-wise prefix test: `/home/user2` is not under `/home/user`.
fn is_under(path: &str, root: &str) -> bool {
    if root.is_empty() {
        return true;
    }
    path == root || path.starts_with(&format!("{root}/"))
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_traversal_blocked() {
        match validate_path("../../../etc/passwd", &[], &[]).unwrap_err() {
            PathValidationError::PathTraversal { .. } => {}
            other => panic!("Expected PathTraversal, got: {other}"),
        }
        assert!(validate_path("/home/user/../../../etc/passwd", &[], &[]).is_err());
    }

    #[test]
    fn forbidden_path_blocked() {
        let forbidden = vec!["/etc".into(), "/root".into()];
        match validate_path("/etc/passwd", &[], &forbidden).unwrap_err() {
            PathValidationError::ForbiddenPath { pattern, .. } => assert_eq!(pattern, "/etc"),
            other => panic!("Expected ForbiddenPath, got: {other}"),
        }
    }

    #[test]
    fn forbidden_is_case_insensitive() {
        let forbidden = vec!["/etc".into()];
        assert!(validate_path("/ETC/passwd", &[], &forbidden).is_err());
    }

    #[test]
    fn sibling_prefix_is_not_inside_root() {
        let allowed = vec!["/home/user/project".into()];
        assert!(validate_path("/home/user/project/src/main.rs", &allowed, &[]).is_ok());
        assert!(validate_path("/home/user/project2/secret.txt", &allowed, &[]).is_err());
    }

    #[test]
    fn forbidden_takes_precedence_over_allowed() {
        let allowed = vec!["/home/user".into()];
        let forbidden = vec!["/home/user/.ssh".into()];
        assert!(validate_path("/home/user/.ssh/id_rsa", &allowed, &forbidden).is_err());
    }

    #[test]
    fn workspace_policy_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        let policy = PathPolicy::workspace(dir.path());

        let resolved = policy.resolve("notes.txt").unwrap();
        assert_eq!(std::fs::read_to_string(resolved).unwrap(), "hi");

        // New files resolve through their existing parent
        let target = policy.resolve("new.txt").unwrap();
        assert!(target.ends_with("new.txt"));
    }

    #[test]
    fn workspace_policy_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::workspace(dir.path());
        assert!(matches!(
            policy.resolve("../outside.txt"),
            Err(PathValidationError::PathTraversal { .. })
        ));
        assert!(matches!(
            policy.resolve("/etc/hostname"),
            Err(PathValidationError::ForbiddenPath { .. })
        ));
    }

    #[test]
    fn unrestricted_policy_still_forbids() {
        let policy = PathPolicy::unrestricted();
        assert!(policy.resolve("/etc/passwd").is_err());
        assert!(policy.resolve("/tmp/scratch.txt").is_ok());
    }

    #[test]
    fn relative_policy_allows_outside_paths_but_honours_extra_forbids() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let other_root = other.path().canonicalize().unwrap();
        let policy = PathPolicy::relative_to(dir.path())
            .forbid([other_root.to_string_lossy().into_owned()]);

        assert!(policy.resolve("notes.txt").unwrap().starts_with(dir.path().canonicalize().unwrap()));
        assert!(policy.resolve("/tmp/scratch.txt").is_ok());
        assert!(matches!(
            policy.resolve(&other_root.join("x.txt").to_string_lossy()),
            Err(PathValidationError::ForbiddenPath { .. })
        ));
    }

    #[test]
    fn extra_roots_extend_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        let shared_root = shared.path().canonicalize().unwrap();
        let policy = PathPolicy::workspace(dir.path())
            .allow_root(shared_root.to_string_lossy().into_owned());

        assert!(policy.resolve(&shared_root.join("data.csv").to_string_lossy()).is_ok());
        assert!(matches!(
            policy.resolve("/tmp/elsewhere.txt"),
            Err(PathValidationError::OutsideAllowedRoots { .. })
        ));
    }

    #[test]
    fn forbidden_with_tilde_expansion() {
        let forbidden = vec!["~/.ssh".into()];
        if let Some(home) = home_dir() {
            let ssh_path = format!("{home}/.ssh/id_rsa");
            assert!(validate_path(&ssh_path, &[], &forbidden).is_err());
        }
    }
}
