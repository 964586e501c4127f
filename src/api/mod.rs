//! OpenAI-compatible chat-completions payloads.

use crate::core::message::{
    ConversationMessage, PendingToolCall, ToolResultEntry, ROLE_ASSISTANT, ROLE_SYSTEM, ROLE_TOOL,
    ROLE_USER,
};
use crate::core::provider::{Completion, ProviderError, TokenUsage, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

pub mod openai;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: ChatToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Clone)]
pub struct ChatToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ChatToolFunction,
}

#[derive(Serialize, Clone)]
pub struct ChatToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Deserialize)]
pub struct ChatCompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
pub struct ChatCompletionChoice {
    pub message: ChatCompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

pub fn tool_definitions(tools: &[ToolSpec]) -> Vec<ChatToolDefinition> {
    tools
        .iter()
        .map(|tool| ChatToolDefinition {
            kind: function_kind(),
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: Some(tool.description.clone()).filter(|text| !text.is_empty()),
                parameters: tool.parameters.clone(),
            },
        })
        .collect()
}

/// Converts history into chat messages.
///
/// Tool calls and tool results are only sent in matched pairs: an assistant
/// tool call without a result in the following message is dropped, and so is
/// a result whose call is not in the preceding message.
pub fn chat_messages(history: &[ConversationMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len());
    for (index, message) in history.iter().enumerate() {
        match message {
            ConversationMessage::System { text } => messages.push(text_message(ROLE_SYSTEM, text)),
            ConversationMessage::User { text } => messages.push(text_message(ROLE_USER, text)),
            ConversationMessage::Assistant { text, tool_calls } => {
                let answered = result_ids(history.get(index + 1));
                let calls: Vec<ChatToolCall> = tool_calls
                    .iter()
                    .filter(|call| answered.contains(call.id.as_str()))
                    .map(chat_tool_call)
                    .collect();
                let text = text.clone().filter(|text| !text.is_empty());
                if text.is_none() && calls.is_empty() {
                    continue;
                }
                messages.push(ChatMessage {
                    role: ROLE_ASSISTANT.to_string(),
                    content: text,
                    name: None,
                    tool_call_id: None,
                    tool_calls: Some(calls).filter(|calls| !calls.is_empty()),
                });
            }
            ConversationMessage::ToolResult { results } => {
                let requested = call_ids(index.checked_sub(1).and_then(|prev| history.get(prev)));
                messages.extend(
                    results
                        .iter()
                        .filter(|result| requested.contains(result.call_id.as_str()))
                        .map(tool_message),
                );
            }
        }
    }
    messages
}

fn text_message(role: &str, text: &str) -> ChatMessage {
    ChatMessage {
        role: role.to_string(),
        content: Some(text.to_string()),
        name: None,
        tool_call_id: None,
        tool_calls: None,
    }
}

fn chat_tool_call(call: &PendingToolCall) -> ChatToolCall {
    ChatToolCall {
        id: call.id.clone(),
        kind: function_kind(),
        function: ChatToolCallFunction {
            name: call.qualified_name.clone(),
            arguments: Value::Object(call.arguments.clone()).to_string(),
        },
    }
}

fn tool_message(result: &ToolResultEntry) -> ChatMessage {
    let text = result.text();
    let content = match (result.is_error, text.is_empty()) {
        (true, true) => "Error: the tool reported a failure.".to_string(),
        (true, false) => format!("Error: {text}"),
        (false, _) => text,
    };
    ChatMessage {
        role: ROLE_TOOL.to_string(),
        content: Some(content),
        name: Some(result.qualified_name.clone()),
        tool_call_id: Some(result.call_id.clone()),
        tool_calls: None,
    }
}

fn result_ids(message: Option<&ConversationMessage>) -> HashSet<&str> {
    match message {
        Some(ConversationMessage::ToolResult { results }) => {
            results.iter().map(|result| result.call_id.as_str()).collect()
        }
        _ => HashSet::new(),
    }
}

fn call_ids(message: Option<&ConversationMessage>) -> HashSet<&str> {
    match message {
        Some(ConversationMessage::Assistant { tool_calls, .. }) => {
            tool_calls.iter().map(|call| call.id.as_str()).collect()
        }
        _ => HashSet::new(),
    }
}

/// First choice of a completion response, or `None` when there is none.
pub fn parse_completion(response: ChatCompletionResponse) -> Result<Option<Completion>, ProviderError> {
    let usage = response.usage.map(|usage| TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    });
    let Some(choice) = response.choices.into_iter().next() else {
        return Ok(None);
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| PendingToolCall {
            arguments: parse_arguments(&call.function.name, &call.function.arguments),
            id: call.id,
            qualified_name: call.function.name,
        })
        .collect();

    Ok(Some(Completion {
        text: choice.message.content,
        tool_calls,
        usage,
    }))
}

fn parse_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => arguments,
        Ok(other) => {
            warn!(tool = %tool, arguments = %other, "Tool arguments are not an object; ignoring");
            Map::new()
        }
        Err(err) => {
            warn!(tool = %tool, error = %err, "Unable to parse tool arguments; ignoring");
            Map::new()
        }
    }
}

/// Pulls the human-readable message out of an error body when there is one.
pub fn extract_error_summary(body: &str) -> String {
    let summary = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| value.get("error").and_then(Value::as_str).map(str::to_owned))
            .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_owned))
    });
    let text = summary.unwrap_or_else(|| body.to_string());
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
