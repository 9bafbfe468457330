//! Memory for CodeAct agents.
//!
//! - [`WorkingMemory`] is the per-task scratchpad: system prompt, task and
//!   the append-only list of steps, rendered into a token-bounded history.
//! - [`ConversationMemory`] holds the session's user/assistant messages
//!   across tasks, with lookup by message id.

pub mod conversation;
pub mod token;
pub mod working;

pub use conversation::ConversationMemory;
pub use token::{estimate_message_tokens, estimate_tokens};
pub use working::WorkingMemory;
