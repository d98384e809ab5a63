//! Core agent types.

use serde::{Deserialize, Serialize};

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "user" or "assistant".
    pub role: Role,

    /// Message content.
    pub content: Content,
}

/// Message role.
///
/// The system prompt is held separately on the conversation; tool results
/// ride in user messages as blocks and are converted to `role: "tool"` wire
/// messages by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content - can be text or structured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Simple text content.
    Text(String),

    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Get the text content, joining blocks if necessary.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content.
    Text { text: String },

    /// Tool call request from the assistant.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result answering a prior tool call.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// A single tool call lifted out of an assistant turn, ready for dispatch.
///
/// The id is unique within one assistant turn; arguments have been assembled
/// from streamed fragments but not yet validated.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Lift a `ToolUse` block into a dispatchable call.
    #[must_use]
    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::ToolUse { id, name, input } => Some(Self {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => None,
        }
    }
}

/// Outcome of executing (or refusing) one tool call.
///
/// Created on the execution path and immediately consumed into a tool-result
/// message; never retained.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,

    /// Tool description.
    pub description: String,

    /// JSON schema for input parameters.
    pub input_schema: serde_json::Value,
}

/// Why the response stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token usage.
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Events emitted during chat for UI rendering.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Text chunk from the assistant.
    Text(String),
    /// Tool invocation starting (for activity status).
    ToolStart { name: String, invocation: String },
    /// Tool invocation finished, with result.
    ToolCall {
        name: String,
        invocation: String,
        output: String,
        is_error: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_text_joins_blocks() {
        let content = Content::Blocks(vec![
            ContentBlock::Text {
                text: "hello ".to_string(),
            },
            ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "read_file".to_string(),
                input: serde_json::json!({"path": "a.txt"}),
            },
            ContentBlock::Text {
                text: "world".to_string(),
            },
        ]);
        assert_eq!(content.text(), "hello world");
    }

    #[test]
    fn tool_call_lifts_only_tool_use_blocks() {
        let block = ContentBlock::ToolUse {
            id: "call_1".to_string(),
            name: "run_command".to_string(),
            input: serde_json::json!({"command": "ls"}),
        };
        let call = ToolCall::from_block(&block).unwrap();
        assert_eq!(call.name, "run_command");
        assert_eq!(call.arguments["command"], "ls");

        let text = ContentBlock::Text {
            text: "no".to_string(),
        };
        assert!(ToolCall::from_block(&text).is_none());
    }
}
