//! Conversation history sent with every generation request.
//!
//! The system prompt is pinned; after that at most `max_turns` user turns (each followed by
//! its assistant reply, when there is one) are kept, oldest evicted first.

use crate::services::{ChatMessage, Role};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct Transcript {
    system: ChatMessage,
    history: VecDeque<ChatMessage>,
    max_turns: usize,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            system: ChatMessage::system(system_prompt),
            history: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push_back(ChatMessage::user(content));
        self.evict();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push_back(ChatMessage::assistant(content));
    }

    /// Remove a trailing user entry that never got a reply.
    pub fn discard_unanswered(&mut self) {
        if matches!(self.history.back(), Some(m) if m.role == Role::User) {
            self.history.pop_back();
        }
    }

    pub fn user_turns(&self) -> usize {
        self.history.iter().filter(|m| m.role == Role::User).count()
    }

    /// System prompt followed by the retained history.
    pub fn messages(&self) -> Vec<ChatMessage> {
        std::iter::once(self.system.clone())
            .chain(self.history.iter().cloned())
            .collect()
    }

    fn evict(&mut self) {
        while self.user_turns() > self.max_turns {
            // Drop the oldest user message and the replies that belong to it
            self.history.pop_front();
            while matches!(self.history.front(), Some(m) if m.role != Role::User) {
                self.history.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_always_first() {
        let mut transcript = Transcript::new("be nice", 2);
        transcript.push_user("hi");
        let messages = transcript.messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "be nice");
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn test_oldest_turns_evicted() {
        let mut transcript = Transcript::new("sys", 2);
        for i in 0..4 {
            transcript.push_user(format!("q{}", i));
            transcript.push_assistant(format!("a{}", i));
        }
        transcript.push_user("q4");

        let contents: Vec<String> = transcript.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["sys", "q3", "a3", "q4"]);
        assert_eq!(transcript.user_turns(), 2);
    }

    #[test]
    fn test_discard_unanswered_only_removes_trailing_user() {
        let mut transcript = Transcript::new("sys", 5);
        transcript.push_user("q0");
        transcript.push_assistant("a0");
        transcript.discard_unanswered();
        assert_eq!(transcript.messages().len(), 3);

        transcript.push_user("q1");
        transcript.discard_unanswered();
        assert_eq!(transcript.messages().len(), 3);
    }
}
