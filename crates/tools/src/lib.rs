//! Built-in tool implementations for CodeAct.
//!
//! Tools give generated actions the ability to act: do math, read and
//! write files, run allow-listed commands. Hosts add their own through
//! [`FnTool`] closures or a [`ToolProvider`].

pub mod calculator;
pub mod file_read;
pub mod file_write;
pub mod function;
pub mod provider;
pub mod shell;

pub use calculator::CalculatorTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use function::FnTool;
pub use provider::{
    BuiltinProvider, LoadReport, StaticProvider, ToolProvider, default_registry, load_providers,
};
pub use shell::ShellTool;
