//! The session's message log.
//!
//! Messages are kept in arrival order with an id index for constant-time
//! lookup. The log is bounded; once full, the oldest messages are evicted.

use codeact_core::{Message, Role};
use std::collections::{HashMap, VecDeque};

use crate::token::estimate_message_tokens;

/// Ordered, bounded message log with lookup by id.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    messages: VecDeque<Message>,
    /// id → absolute sequence number
    index: HashMap<String, u64>,
    /// Sequence number of `messages[0]`
    base_seq: u64,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            index: HashMap::new(),
            base_seq: 0,
            max_messages: max_messages.max(1),
        }
    }

    /// Append a message, evicting the oldest one when full.
    ///
    /// Returns the message id.
    pub fn add(&mut self, message: Message) -> String {
        if self.messages.len() == self.max_messages {
            if let Some(evicted) = self.messages.pop_front() {
                self.index.remove(&evicted.id);
                self.base_seq += 1;
                tracing::trace!(id = %evicted.id, "Evicted oldest conversation message");
            }
        }
        let id = message.id.clone();
        let seq = self.base_seq + self.messages.len() as u64;
        self.index.insert(id.clone(), seq);
        self.messages.push_back(message);
        id
    }

    pub fn add_user(&mut self, content: impl Into<String>) -> String {
        self.add(Message::user(content))
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) -> String {
        self.add(Message::assistant(content))
    }

    /// Look up a message by id.
    pub fn get(&self, id: &str) -> Option<&Message> {
        let seq = *self.index.get(id)?;
        self.messages.get((seq - self.base_seq) as usize)
    }

    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages.iter()
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// The most recent messages that fit within `max_tokens`, oldest first.
    pub fn within_budget(&self, max_tokens: usize) -> Vec<Message> {
        let mut used = 0;
        let mut kept = Vec::new();
        for message in self.messages.iter().rev() {
            let cost = estimate_message_tokens(message);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            kept.push(message.clone());
        }
        kept.reverse();
        kept
    }

    /// Render the most recent messages within `max_tokens` as `role: content` lines.
    pub fn format(&self, max_tokens: usize) -> String {
        self.within_budget(max_tokens)
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn last_of(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.base_seq += self.messages.len() as u64;
        self.messages.clear();
        self.index.clear();
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_keep_arrival_order() {
        let mut conv = ConversationMemory::default();
        conv.add_user("hello");
        conv.add_assistant("hi there");
        conv.add_user("solve 2+2");
        let contents: Vec<&str> = conv.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi there", "solve 2+2"]);
    }

    #[test]
    fn lookup_by_id() {
        let mut conv = ConversationMemory::default();
        let a = conv.add_user("first");
        let b = conv.add_assistant("second");
        assert_eq!(conv.get(&a).unwrap().content, "first");
        assert_eq!(conv.get(&b).unwrap().role, Role::Assistant);
        assert!(conv.get("missing").is_none());
    }

    #[test]
    fn eviction_keeps_index_consistent() {
        let mut conv = ConversationMemory::new(3);
        let ids: Vec<String> = (0..5).map(|i| conv.add_user(format!("m{i}"))).collect();
        assert_eq!(conv.len(), 3);
        assert!(conv.get(&ids[0]).is_none());
        assert!(conv.get(&ids[1]).is_none());
        for (i, id) in ids.iter().enumerate().skip(2) {
            assert_eq!(conv.get(id).unwrap().content, format!("m{i}"));
        }
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut conv = ConversationMemory::default();
        for i in 0..5 {
            conv.add_user(format!("m{i}"));
        }
        let tail: Vec<String> = conv.recent(2).into_iter().map(|m| m.content).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(conv.recent(10).len(), 5);
    }

    #[test]
    fn budget_keeps_newest_messages() {
        let mut conv = ConversationMemory::default();
        conv.add_user("a".repeat(400)); // 104 tokens
        conv.add_user("test"); // 5 tokens
        conv.add_assistant("done"); // 5 tokens
        let kept = conv.within_budget(20);
        assert_eq!(kept.len(), 2);
        assert_eq!(conv.format(20), "user: test\nassistant: done");
    }

    #[test]
    fn budget_counts_characters() {
        let mut conv = ConversationMemory::default();
        conv.add_user("é".repeat(16)); // 32 bytes, 4 + 4 tokens
        conv.add_assistant("ok"); // 5 tokens
        assert_eq!(conv.within_budget(13).len(), 2);
        assert_eq!(conv.within_budget(12).len(), 1);
    }

    #[test]
    fn clear_then_add_still_indexes() {
        let mut conv = ConversationMemory::new(2);
        conv.add_user("one");
        conv.add_user("two");
        conv.clear();
        assert!(conv.is_empty());
        let id = conv.add_user("three");
        assert_eq!(conv.get(&id).unwrap().content, "three");
        assert_eq!(conv.last_of(Role::User).unwrap().content, "three");
    }
}
