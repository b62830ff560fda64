//! Session memory
//!
//! The ordered conversational transcript for one run. Append-only between
//! compactions; compaction folds the middle of the transcript into a single
//! summary message once the content exceeds a byte budget. The first two
//! messages (system prompt + original task) and the most recent tail are
//! always preserved verbatim.

use crate::llm::types::Message;

/// Number of trailing messages preserved verbatim by compaction
pub const COMPACTION_TAIL_COUNT: usize = 6;

/// Per-run conversational transcript
#[derive(Debug, Clone, Default)]
pub struct SessionMemory {
    /// Messages in order
    pub messages: Vec<Message>,
}

impl SessionMemory {
    /// Create an empty transcript
    pub fn new() -> Self {
        SessionMemory::default()
    }

    /// Append a message
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Total content bytes across the transcript
    pub fn content_bytes(&self) -> usize {
        self.messages.iter().map(Message::content_bytes).sum()
    }

    /// The last `n` messages
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Message count
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Fold the middle of the transcript into one summary user-message when
    /// the byte budget is exceeded. Returns true when a rewrite happened.
    pub fn compact_if_needed(&mut self, budget_bytes: usize) -> bool {
        if self.content_bytes() <= budget_bytes {
            return false;
        }
        if self.messages.len() <= 2 + COMPACTION_TAIL_COUNT {
            return false;
        }

        let tail_start = self.messages.len() - COMPACTION_TAIL_COUNT;
        let middle = &self.messages[2..tail_start];
        let summary = summarize_messages(middle);

        let mut compacted = Vec::with_capacity(3 + COMPACTION_TAIL_COUNT);
        compacted.extend_from_slice(&self.messages[..2]);
        compacted.push(Message::user(summary));
        compacted.extend_from_slice(&self.messages[tail_start..]);
        self.messages = compacted;
        true
    }
}

fn summarize_messages(middle: &[Message]) -> String {
    let mut lines = vec![format!(
        "Summary of {} earlier messages (compacted to save context):",
        middle.len()
    )];
    for message in middle {
        let snippet: String = message.content.chars().take(160).collect();
        let marker = if message.content.chars().count() > 160 { "..." } else { "" };
        lines.push(format!("- {}: {}{}", message.role, snippet.trim(), marker));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;

    fn transcript_with(middle_count: usize, content: &str) -> SessionMemory {
        let mut memory = SessionMemory::new();
        memory.add(Message::system("system prompt"));
        memory.add(Message::user("the original task"));
        for idx in 0..middle_count {
            memory.add(Message::assistant(format!("{content} {idx}")));
        }
        memory
    }

    #[test]
    fn no_compaction_under_budget() {
        let mut memory = transcript_with(10, "short");
        assert!(!memory.compact_if_needed(1_000_000));
        assert_eq!(memory.len(), 12);
    }

    #[test]
    fn compaction_preserves_head_and_tail_verbatim() {
        let filler = "x".repeat(500);
        let mut memory = transcript_with(20, &filler);
        let before = memory.messages.clone();

        assert!(memory.compact_if_needed(1_000));

        // head
        assert_eq!(memory.messages[0].content, before[0].content);
        assert_eq!(memory.messages[0].role, Role::System);
        assert_eq!(memory.messages[1].content, before[1].content);
        // one summary message in the middle
        assert_eq!(memory.len(), 2 + 1 + COMPACTION_TAIL_COUNT);
        assert_eq!(memory.messages[2].role, Role::User);
        assert!(memory.messages[2].content.contains("Summary of"));
        // tail byte-identical
        for offset in 0..COMPACTION_TAIL_COUNT {
            assert_eq!(
                memory.messages[3 + offset].content,
                before[before.len() - COMPACTION_TAIL_COUNT + offset].content
            );
        }
    }

    #[test]
    fn short_transcripts_are_never_rewritten() {
        let filler = "y".repeat(100_000);
        let mut memory = transcript_with(COMPACTION_TAIL_COUNT, &filler);
        assert!(!memory.compact_if_needed(10));
    }

    #[test]
    fn recent_returns_tail_window() {
        let memory = transcript_with(5, "m");
        assert_eq!(memory.recent(3).len(), 3);
        assert_eq!(memory.recent(100).len(), 7);
    }
}
