//! Abstract session contract shared by every MCP server connection.
//!
//! The orchestration layers (manager, registry, executor, callbacks) only
//! speak to servers through [`Session`]. Concrete JSON-RPC transports live in
//! [`crate::mcp::client`]; tests substitute scripted sessions.

use async_trait::async_trait;
use rust_mcp_schema::{RequestId, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capability flags negotiated once during `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
    pub logging: bool,
}

impl Capabilities {
    /// Reads the flags from a server `capabilities` object. A flag is set when
    /// the corresponding key is present, whatever its contents.
    pub fn from_server_capabilities(value: &Value) -> Self {
        let has = |key: &str| value.get(key).is_some_and(|entry| !entry.is_null());
        Self {
            tools: has("tools"),
            resources: has("resources"),
            prompts: has("prompts"),
            logging: has("logging"),
        }
    }

    pub fn summary(&self) -> String {
        let mut flags = Vec::new();
        if self.tools {
            flags.push("tools");
        }
        if self.resources {
            flags.push("resources");
        }
        if self.prompts {
            flags.push("prompts");
        }
        if self.logging {
            flags.push("logging");
        }
        if flags.is_empty() {
            "none".to_string()
        } else {
            flags.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgumentInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgumentInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
}

impl PromptArgumentInfo {
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }
}

/// One content block of a tool result or prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
        #[serde(default)]
        data: String,
    },
    Audio {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
        #[serde(default)]
        data: String,
    },
    Resource {
        resource: ResourceContent,
    },
    ResourceLink {
        uri: String,
        #[serde(default)]
        name: String,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    /// Renders the block as text for providers that only accept strings.
    pub fn as_display_text(&self) -> String {
        match self {
            ContentItem::Text { text } => text.clone(),
            ContentItem::Image { mime_type, data } => {
                format!("[image {mime_type}, {} bytes base64]", data.len())
            }
            ContentItem::Audio { mime_type, data } => {
                format!("[audio {mime_type}, {} bytes base64]", data.len())
            }
            ContentItem::Resource { resource } => resource.as_display_text(),
            ContentItem::ResourceLink { uri, name } if name.is_empty() => format!("[resource {uri}]"),
            ContentItem::ResourceLink { uri, name } => format!("[resource {name}: {uri}]"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutcome {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContent {
    pub fn as_display_text(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        let mime = self.mime_type.as_deref().unwrap_or("application/octet-stream");
        let size = self.blob.as_ref().map(String::len).unwrap_or(0);
        format!("[binary resource {} ({mime}, {size} bytes base64)]", self.uri)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    pub role: String,
    pub content: ContentItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// Asynchronous traffic a server produces outside of request/response pairs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A server-to-client request (sampling, elicitation, roots, ping).
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A line the server wrote to its error stream.
    Stderr(String),
    /// The underlying connection ended.
    Closed(Option<String>),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("session is not ready ({state})")]
    NotReady { state: String },
    #[error("session was already initialized")]
    AlreadyInitialized,
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("server does not implement {method}")]
    MethodNotFound { method: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

impl SessionError {
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, SessionError::MethodNotFound { .. })
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A live connection to one MCP server.
///
/// `initialize` is called exactly once; it is handed the sender that inbound
/// [`SessionEvent`]s must be published on for the lifetime of the session.
/// A failed `initialize` must release whatever it opened before returning.
#[async_trait]
pub trait Session: Send + Sync {
    async fn initialize(&self, events: EventSender) -> SessionResult<Capabilities>;

    async fn list_tools(&self) -> SessionResult<Vec<ToolDefinition>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> SessionResult<ToolCallOutcome>;

    async fn list_resources(&self) -> SessionResult<Vec<ResourceInfo>>;

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContent>>;

    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplateInfo>>;

    async fn list_prompts(&self) -> SessionResult<Vec<PromptInfo>>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> SessionResult<PromptResult>;

    async fn set_logging_level(&self, level: &str) -> SessionResult<()>;

    /// Answers a server-to-client request previously published as an event.
    async fn respond(&self, id: RequestId, outcome: Result<Value, RpcError>) -> SessionResult<()>;

    async fn close(&self) -> SessionResult<()>;

    /// Short transport label for listings (`stdio`, `http`).
    fn transport_label(&self) -> &'static str;
}
