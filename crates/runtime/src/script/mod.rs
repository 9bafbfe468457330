//! The action language: lexer, parser, and interpreter.

pub mod ast;
pub mod builtins;
pub mod imports;
pub mod interpreter;
pub mod lexer;
pub mod modules;
pub mod parser;
pub mod value;

pub use ast::Program;
pub use imports::scan_imports;
pub use interpreter::{Interpreter, Limits, RunOutcome, bind_tool_arguments};
pub use modules::{AVAILABLE_MODULES, Module};
pub use parser::{parse_expression, parse_program};
