use crate::message::ChatMessage;
use std::collections::VecDeque;

/// Capped, ordered conversation history.
///
/// Mutated only when a turn completes successfully: `push_turn` appends the
/// user entry then the assistant entry, then evicts the oldest entries until
/// the configured limit holds. The single-active-turn invariant means this is
/// never mutated concurrently.
#[derive(Clone, Debug)]
pub struct History {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            limit: limit.max(2),
        }
    }

    /// Append one completed turn: the user utterance and the assistant reply,
    /// in that order.
    pub fn push_turn(&mut self, user_text: impl Into<String>, ai_text: impl Into<String>) {
        self.messages.push_back(ChatMessage::user(user_text));
        self.messages.push_back(ChatMessage::assistant(ai_text));
        while self.messages.len() > self.limit {
            self.messages.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Serialize the history array in the wire shape sent with each turn.
    pub fn to_wire_json(&self) -> String {
        let entries: Vec<&ChatMessage> = self.messages.iter().collect();
        serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Export the history array as a standalone JSON document.
    pub fn export_json(&self) -> String {
        let entries: Vec<&ChatMessage> = self.messages.iter().collect();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn push_turn_appends_user_then_assistant() {
        let mut h = History::new(10);
        h.push_turn("hi", "hello");
        let msgs: Vec<_> = h.iter().collect();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "hi");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, "hello");
    }

    #[test]
    fn history_never_exceeds_limit_and_evicts_oldest_first() {
        let mut h = History::new(4);
        for i in 0..10 {
            h.push_turn(format!("u{}", i), format!("a{}", i));
            assert!(h.len() <= 4);
        }
        let msgs: Vec<_> = h.iter().collect();
        assert_eq!(msgs[0].content, "u8");
        assert_eq!(msgs[1].content, "a8");
        assert_eq!(msgs[2].content, "u9");
        assert_eq!(msgs[3].content, "a9");
    }

    #[test]
    fn wire_json_is_an_array_of_role_content_objects() {
        let mut h = History::new(10);
        h.push_turn("hi", "hello");
        let parsed: Vec<ChatMessage> = serde_json::from_str(&h.to_wire_json()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].content, "hi");
    }

    #[test]
    fn export_is_a_valid_json_document() {
        let mut h = History::new(10);
        h.push_turn("q", "r");
        let doc: serde_json::Value = serde_json::from_str(&h.export_json()).unwrap();
        assert!(doc.is_array());
        assert_eq!(doc.as_array().unwrap().len(), 2);
    }
}
