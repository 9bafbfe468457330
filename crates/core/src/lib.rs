//! # CodeAct Core
//!
//! Domain types, traits, and error definitions for the CodeAct agent runtime.
//! It holds the domain model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is defined here. Implementations live in their
//! respective crates:
//! - the language model service ([`Provider`]) lives in `codeact-providers`
//! - the sandboxed executor lives in `codeact-runtime`
//! - the reasoning loop lives in `codeact-agent`

pub mod error;
pub mod event;
pub mod execution;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{AgentEvent, EventBus, EventObserver, ObserverError, TracingObserver};
pub use execution::{
    ContextVariables, ErrorCategory, ExecutionResult, ExecutionStatus, Step, TaskStatus,
    value_to_text,
};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use tool::{
    ArgType, RegisteredTool, Tool, ToolArgument, ToolContext, ToolDefinition,
    ToolDefinitionBuilder, ToolNamespace, ToolOverride, ToolRegistry, ToolResult,
};
