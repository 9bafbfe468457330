//! Rough token counts for budgeting prompt history.
//!
//! Counts characters, not bytes, at four per token. The same text always
//! costs the same, which keeps rendered history stable between prompts.

use codeact_core::Message;

const CHARS_PER_TOKEN: usize = 4;

/// Role marker and separators added around every message.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Approximate tokens in `text`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Approximate tokens one message adds to a prompt.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_tokens_round_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Eight characters, twenty-four bytes
        assert_eq!(estimate_tokens("日本語のテキスト"), 2);
    }

    #[test]
    fn messages_pay_a_fixed_overhead() {
        assert_eq!(estimate_message_tokens(&Message::user("")), MESSAGE_OVERHEAD);
        assert_eq!(estimate_message_tokens(&Message::assistant("x".repeat(40))), 14);
    }
}
