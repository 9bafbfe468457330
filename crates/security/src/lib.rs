//! Security policies for CodeAct: import allow-lists, path validation and audit logging.
//!
//! Provides:
//! - **Allowlists**: which modules generated code may import, which shell
//!   commands the shell tool may run
//! - **Path validation**: filesystem sandboxing for file tools
//! - **Audit logging**: structured records of violations, confirmations and
//!   tool executions

pub mod allowlist;
pub mod audit;
pub mod path;

pub use allowlist::{AllowlistPolicy, CheckResult, ModuleAllowlist};
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use path::{PathPolicy, PathValidationError, validate_path};
