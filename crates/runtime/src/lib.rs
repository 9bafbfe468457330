//! # CodeAct Runtime
//!
//! Runs generated actions in-process, in a small Python-flavoured language
//! with no access to the host except through registered tools.
//!
//! - [`script`]: lexer, parser and interpreter for the action language
//! - [`Executor`]: static checks, timeouts, and result categorisation
//! - [`deadline`]: the per-action time budget, paused during confirmations
//! - [`confirmation`]: user approval for sensitive tools
//! - [`meta_tool`]: `agent.add_tool`, tools defined by actions

pub mod confirmation;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod meta_tool;
pub mod script;

pub use confirmation::{
    AsyncFnConfirmation, AutoApprove, AutoDeny, ChannelConfirmation, ConfirmationHandler,
    ConfirmationRequest, FnConfirmation, PendingConfirmation, request_confirmation,
};
pub use deadline::{ActionDeadline, PausedDeadline};
pub use error::{ScriptError, ScriptResult};
pub use executor::Executor;
pub use meta_tool::{AddToolTool, CUSTOM_TOOLBOX, ScriptTool, install_add_tool};
pub use script::{AVAILABLE_MODULES, Interpreter, Limits, RunOutcome};
