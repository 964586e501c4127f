use crate::mcp::session::ContentItem;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_TOOL: &str = "tool";

/// A tool invocation requested by the model, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub qualified_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub call_id: String,
    pub qualified_name: String,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultEntry {
    /// Content blocks flattened to text, one block per line.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ContentItem::as_display_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    System {
        text: String,
    },
    User {
        text: String,
    },
    Assistant {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        tool_calls: Vec<PendingToolCall>,
    },
    ToolResult {
        results: Vec<ToolResultEntry>,
    },
}

impl ConversationMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ConversationMessage::System { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        ConversationMessage::User { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        ConversationMessage::Assistant {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ConversationMessage::System { .. } => ROLE_SYSTEM,
            ConversationMessage::User { .. } => ROLE_USER,
            ConversationMessage::Assistant { .. } => ROLE_ASSISTANT,
            ConversationMessage::ToolResult { .. } => ROLE_TOOL,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, ConversationMessage::System { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ConversationMessage::ToolResult { .. })
    }

    /// One-line rendering used by `/history`.
    pub fn summary(&self) -> String {
        match self {
            ConversationMessage::System { text } | ConversationMessage::User { text } => {
                text.clone()
            }
            ConversationMessage::Assistant { text, tool_calls } => {
                let mut parts = Vec::new();
                if let Some(text) = text.as_deref().filter(|text| !text.trim().is_empty()) {
                    parts.push(text.to_string());
                }
                for call in tool_calls {
                    let arguments = Value::Object(call.arguments.clone());
                    parts.push(format!("-> {}({arguments})", call.qualified_name));
                }
                parts.join("\n")
            }
            ConversationMessage::ToolResult { results } => results
                .iter()
                .map(|result| {
                    let marker = if result.is_error { " (error)" } else { "" };
                    format!("<- {}{marker}: {}", result.qualified_name, result.text())
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
