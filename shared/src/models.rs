//! Shared data models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deepcitation::FileDataPart;

/// Who can see a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatVisibility {
    Private,
    Public,
}

impl ChatVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatVisibility::Private => "private",
            ChatVisibility::Public => "public",
        }
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// Lifecycle of a tool-call part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    InputAvailable,
    OutputAvailable,
}

/// One typed part of a chat message.
///
/// Parts are stored as JSONB and round-trip losslessly between message rows
/// and the UI message shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    File {
        url: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        state: ToolCallState,
    },
}

/// An uploaded file referenced by a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// A chat message in its UI shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Text of the last user message's first text part, if any.
pub fn last_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)?
        .parts
        .iter()
        .find_map(|p| match p {
            MessagePart::Text { text } => Some(text.as_str()),
            _ => None,
        })
}

/// DeepCitation session data threaded through a chat request.
///
/// The blobs inside are produced and consumed by the vendor service; this
/// app only reads the named fields and passes the rest through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepCitationSession {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "deepTextPromptPortion")]
    pub deep_text_prompt_portion: Option<Vec<String>>,
    #[serde(rename = "fileDataParts")]
    pub file_data_parts: Option<Vec<FileDataPart>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_tagging_round_trip() {
        let part = MessagePart::ToolCall {
            tool_call_id: "call_1".to_string(),
            tool_name: "get_weather".to_string(),
            input: serde_json::json!({"latitude": 51.5}),
            output: None,
            state: ToolCallState::InputAvailable,
        };

        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "tool-call");
        assert_eq!(json["state"], "input-available");

        let back: MessagePart = serde_json::from_value(json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn test_text_content_joins_text_parts_only() {
        let msg = ChatMessage {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            parts: vec![
                MessagePart::Text {
                    text: "hello".to_string(),
                },
                MessagePart::File {
                    url: "https://example.com/a.pdf".to_string(),
                    media_type: "application/pdf".to_string(),
                    name: Some("a.pdf".to_string()),
                },
                MessagePart::Text {
                    text: "world".to_string(),
                },
            ],
        };

        assert_eq!(msg.text_content(), "hello\nworld");
    }

    #[test]
    fn test_last_user_text_skips_assistant() {
        let user = ChatMessage {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            parts: vec![MessagePart::Text {
                text: "question".to_string(),
            }],
        };
        let assistant = ChatMessage {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            parts: vec![MessagePart::Text {
                text: "answer".to_string(),
            }],
        };

        assert_eq!(last_user_text(&[user, assistant]), Some("question"));
    }
}
