//! JSON-RPC framing shared by the stdio and HTTP transports.

use crate::mcp::session::{SessionError, SessionEvent};
use crate::mcp::transport::is_method_not_found;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{Implementation, RequestId, RpcError, LATEST_PROTOCOL_VERSION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// One decoded line (or SSE payload, or batch element) from a server.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Answer to one of our requests.
    Reply(RequestId, ServerMessage),
    Event(SessionEvent),
}

pub(crate) fn request_message(id: &RequestId, method: &str, params: Option<Value>) -> Value {
    let mut message = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method });
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}

pub(crate) fn notification_message(method: &str, params: Option<Value>) -> Value {
    let mut message = json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}

pub(crate) fn response_message(id: &RequestId, outcome: Result<Value, RpcError>) -> Value {
    match outcome {
        Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
    }
}

/// Splits a decoded payload into replies and events. Batches are flattened.
pub(crate) fn decode_inbound(value: Value) -> Vec<Inbound> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(decode_single).collect(),
        other => decode_single(other).into_iter().collect(),
    }
}

fn decode_single(value: Value) -> Option<Inbound> {
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        return Some(match value.get("id") {
            Some(id) => {
                let id = serde_json::from_value::<RequestId>(id.clone()).ok()?;
                Inbound::Event(SessionEvent::Request { id, method, params })
            }
            None => Inbound::Event(SessionEvent::Notification { method, params }),
        });
    }

    let message = serde_json::from_value::<ServerMessage>(value).ok()?;
    let id = match &message {
        ServerMessage::Response(response) => response.id.clone(),
        ServerMessage::Error(error) => error.id.clone()?,
        _ => return None,
    };
    Some(Inbound::Reply(id, message))
}

/// Result payload of a reply, or the mapped JSON-RPC error.
pub(crate) fn parse_response_value(
    method: &str,
    message: ServerMessage,
) -> Result<Value, SessionError> {
    if is_method_not_found(&message) {
        return Err(SessionError::MethodNotFound {
            method: method.to_string(),
        });
    }
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map_err(|err| SessionError::Protocol(err.to_string())),
        ServerMessage::Error(error) => Err(SessionError::Rpc {
            code: error.error.code,
            message: format_rpc_error(&error.error),
        }),
        other => Err(SessionError::Protocol(format_unexpected_server_message(&other))),
    }
}

pub(crate) fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T, SessionError> {
    serde_json::from_value(value).map_err(|err| SessionError::Protocol(err.to_string()))
}

pub(crate) fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected MCP server message: {message:?}")
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = error.message.clone();
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| data.as_str().map(str::to_string))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details.filter(|details| !details.is_empty()) {
            output.push('\n');
            output.push_str(&details);
        }
    }
    output
}

/// `initialize` parameters advertising the callbacks this host serves.
pub(crate) fn client_details() -> Value {
    let client_info = Implementation {
        name: "mcphost".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        title: Some("MCP Host".to_string()),
        description: Some("Terminal MCP host".to_string()),
        icons: Vec::new(),
        website_url: None,
    };
    json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {
            "sampling": {},
            "elicitation": {},
            "roots": { "listChanged": false }
        },
        "clientInfo": client_info,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeReply {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
}

/// Validates an `initialize` result.
pub(crate) fn parse_initialize(value: Value) -> Result<InitializeReply, SessionError> {
    let reply: InitializeReply = decode_result(value)?;
    if reply.protocol_version.trim().is_empty() {
        return Err(SessionError::Protocol(
            "Unexpected initialize response.".to_string(),
        ));
    }
    Ok(reply)
}

/// Protocol version for follow-up requests: negotiated when known.
pub(crate) fn effective_protocol_version(negotiated: Option<&str>) -> String {
    match negotiated {
        Some(version) if !version.trim().is_empty() => version.to_string(),
        _ => LATEST_PROTOCOL_VERSION.to_string(),
    }
}

pub(crate) fn paginated_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|cursor| json!({ "cursor": cursor }))
}

/// Items under `key` plus the continuation cursor of one listing page.
pub(crate) fn decode_page<T: DeserializeOwned>(
    mut value: Value,
    key: &str,
) -> Result<(Vec<T>, Option<String>), SessionError> {
    let next_cursor = value
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string);
    let items = match value.get_mut(key).map(Value::take) {
        Some(Value::Null) | None => Vec::new(),
        Some(items) => decode_result(items)?,
    };
    Ok((items, next_cursor))
}
