use homeplan_core::{ChatMessage, truncate_with_marker};

pub const TRIM_MARKER: &str = "... [truncated]";

/// Conversation owned by one plan run. The system prompt is pinned; entries
/// accumulate and are only bounded when a request is built.
#[derive(Debug, Clone)]
pub struct Transcript {
    system: ChatMessage,
    entries: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system: ChatMessage::system(system_prompt),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    /// System prompt plus the newest entries that fit in `max_chars`.
    pub fn trimmed(&self, max_chars: usize) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.entries.len() + 1);
        messages.push(self.system.clone());
        messages.extend(trim_messages(&self.entries, max_chars));
        messages
    }
}

/// Keep the newest messages whose combined content fits in `max_chars`.
///
/// System messages are always kept and not counted. When not even the newest
/// message fits, it is kept alone, cut to `max_chars` plus [`TRIM_MARKER`].
pub fn trim_messages(messages: &[ChatMessage], max_chars: usize) -> Vec<ChatMessage> {
    let mut kept = Vec::new();
    let mut total = 0usize;
    for message in messages.iter().rev().filter(|m| !m.is_system()) {
        let size = message.content().chars().count();
        if total + size > max_chars {
            break;
        }
        total += size;
        kept.push(message.clone());
    }

    if kept.is_empty()
        && let Some(last) = messages.iter().rev().find(|m| !m.is_system())
    {
        let content = truncate_with_marker(last.content(), max_chars, TRIM_MARKER);
        kept.push(last.with_content(content));
    }
    kept.reverse();

    let mut trimmed: Vec<ChatMessage> = messages.iter().filter(|m| m.is_system()).cloned().collect();
    trimmed.extend(kept);
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keeps_newest_messages_that_fit() {
        let messages = vec![
            ChatMessage::system("rules"),
            ChatMessage::user("a".repeat(10)),
            ChatMessage::assistant("b".repeat(10)),
            ChatMessage::user("c".repeat(10)),
        ];
        let trimmed = trim_messages(&messages, 25);
        assert_eq!(trimmed.len(), 3);
        assert!(trimmed[0].is_system());
        assert_eq!(trimmed[1].content(), "b".repeat(10));
        assert_eq!(trimmed[2].content(), "c".repeat(10));
    }

    #[test]
    fn oversized_last_message_is_truncated() {
        let messages = vec![ChatMessage::user("x".repeat(50))];
        let trimmed = trim_messages(&messages, 10);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content(), format!("{}{TRIM_MARKER}", "x".repeat(10)));
        assert_eq!(trimmed[0].role(), "user");
    }

    #[test]
    fn transcript_pins_system_prompt() {
        let mut transcript = Transcript::new("track progress");
        transcript.push(ChatMessage::user("first"));
        transcript.push(ChatMessage::assistant("second"));
        let messages = transcript.trimmed(6);
        assert_eq!(messages[0], ChatMessage::system("track progress"));
        assert_eq!(messages[1..], [ChatMessage::assistant("second")]);
        assert_eq!(transcript.len(), 2);
    }

    proptest! {
        #[test]
        fn trimmed_entries_fit_the_budget(
            sizes in prop::collection::vec(0usize..200, 1..12),
            max in 1usize..400,
        ) {
            let messages: Vec<ChatMessage> = sizes
                .iter()
                .enumerate()
                .map(|(i, n)| if i % 2 == 0 {
                    ChatMessage::user("u".repeat(*n))
                } else {
                    ChatMessage::assistant("a".repeat(*n))
                })
                .collect();
            let trimmed = trim_messages(&messages, max);
            prop_assert!(!trimmed.is_empty());
            let last = messages.last().expect("non-empty input");
            if last.content().chars().count() <= max {
                let total: usize = trimmed.iter().map(|m| m.content().chars().count()).sum();
                prop_assert!(total <= max);
                prop_assert_eq!(trimmed.last(), Some(last));
            } else {
                prop_assert_eq!(trimmed.len(), 1);
                prop_assert!(trimmed[0].content().ends_with(TRIM_MARKER));
            }
        }
    }
}
