//! The CodeAct agent loop.
//!
//! The agent follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Reason**: the [`Reasoner`] renders the task, variables, step history
//!    and tool documentation into a prompt and parses the model's reply into
//!    a thought and an action
//! 2. **Act**: the [`Executor`](codeact_runtime::Executor) runs the action in
//!    the sandbox, calling tools as `toolbox.tool(...)`
//! 3. **Observe**: the step is recorded in working memory and the action's
//!    variables carry into the next step
//!
//! The loop continues until an action completes or aborts the task, or the
//! step budget is used up.

pub mod error;
pub mod loop_runner;
pub mod outcome;
pub mod reasoner;
pub mod testing;

pub use error::AgentError;
pub use loop_runner::{Agent, CANCELLED, provider_from_settings, standard_registry};
pub use outcome::{OutcomeStatus, TaskOutcome};
pub use reasoner::{
    CodeActStrategy, FewShotExample, FewShotStrategy, GeneratedAction, ParseError, PromptStrategy,
    Reasoner, ReasoningError, ReasoningInput, RetryPolicy,
};
pub use testing::ScriptedProvider;
