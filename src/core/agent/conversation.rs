//! Conversation state management.

use serde::{Deserialize, Serialize};

use crate::core::agent::types::{Content, ContentBlock, Message, Role};

/// Manages multi-turn conversation state.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    system: Option<String>,
}

impl Conversation {
    /// Create a new conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation with a system prompt.
    #[must_use]
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            system: Some(system.into()),
        }
    }

    /// Get the system prompt.
    #[must_use]
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Get all messages.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Add a user message.
    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            role: Role::User,
            content: Content::Text(text.into()),
        });
    }

    /// Add an assistant message with content blocks (for tool use).
    pub fn add_assistant_blocks(&mut self, blocks: Vec<ContentBlock>) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
        });
    }

    /// Add a tool result answering `tool_use_id`.
    pub fn add_tool_result(&mut self, tool_use_id: String, content: String, is_error: bool) {
        let block = ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error: if is_error { Some(true) } else { None },
        };

        // Tool results go in user messages
        self.messages.push(Message {
            role: Role::User,
            content: Content::Blocks(vec![block]),
        });
    }

    /// Trim history to at most `max_messages`, dropping the oldest first.
    ///
    /// Cuts only at a plain user text message so an assistant tool-use turn is
    /// never separated from its tool results; the system prompt lives outside
    /// the message list and is unaffected.
    pub fn trim(&mut self, max_messages: usize) {
        if self.messages.len() <= max_messages {
            return;
        }

        let mut start = self.messages.len() - max_messages;
        while start < self.messages.len() {
            let msg = &self.messages[start];
            if msg.role == Role::User && matches!(msg.content, Content::Text(_)) {
                break;
            }
            start += 1;
        }

        self.messages.drain(..start);
    }

    /// Clear all messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Check if the conversation has any messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_tracks_messages() {
        let mut conv = Conversation::new();

        conv.add_user_message("Hello");
        conv.add_assistant_blocks(vec![ContentBlock::Text {
            text: "Hi there!".to_string(),
        }]);

        assert_eq!(conv.messages().len(), 2);
        assert_eq!(conv.messages()[0].role, Role::User);
        assert_eq!(conv.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn tool_results_ride_in_user_messages() {
        let mut conv = Conversation::new();
        conv.add_tool_result("call_1".to_string(), "ok".to_string(), false);

        let msg = &conv.messages()[0];
        assert_eq!(msg.role, Role::User);
        match &msg.content {
            Content::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    ..
                } => {
                    assert_eq!(tool_use_id, "call_1");
                    assert!(is_error.is_none());
                }
                other => panic!("expected tool result, got {other:?}"),
            },
            Content::Text(_) => panic!("expected blocks"),
        }
    }

    #[test]
    fn trim_keeps_recent_messages() {
        let mut conv = Conversation::new();
        for i in 0..10 {
            conv.add_user_message(format!("message {i}"));
        }

        conv.trim(4);
        assert_eq!(conv.messages().len(), 4);
        assert_eq!(conv.messages()[0].content.text(), "message 6");
    }

    #[test]
    fn trim_does_not_split_tool_exchanges() {
        let mut conv = Conversation::new();
        conv.add_user_message("first");
        conv.add_user_message("second");
        conv.add_assistant_blocks(vec![ContentBlock::ToolUse {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"path": "a.txt"}),
        }]);
        conv.add_tool_result("call_1".to_string(), "contents".to_string(), false);

        // A naive cut at len-2 would start on the tool-use message; the trim
        // must advance past the exchange to the next user text message.
        conv.trim(2);
        assert!(conv.messages().is_empty() || conv.messages()[0].role == Role::User);
        for msg in conv.messages() {
            if let Content::Blocks(blocks) = &msg.content {
                assert!(
                    !matches!(blocks.first(), Some(ContentBlock::ToolResult { .. })),
                    "orphaned tool result survived trim"
                );
            }
        }
    }

    #[test]
    fn trim_noop_under_limit() {
        let mut conv = Conversation::new();
        conv.add_user_message("only");
        conv.trim(40);
        assert_eq!(conv.messages().len(), 1);
    }

    #[test]
    fn conversation_clears() {
        let mut conv = Conversation::new();
        conv.add_user_message("Hello");
        conv.clear();

        assert!(conv.messages().is_empty());
    }
}
