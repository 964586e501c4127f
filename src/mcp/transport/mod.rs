//! Shared MCP transport helpers.
//!
//! Both connection flavours (spawned stdio process, streamable HTTP endpoint)
//! use these for header handling and method-not-found detection so the
//! session layer sees identical behaviour.

use rust_mcp_schema::schema_utils::ServerMessage;

pub mod streamable_http;

/// JSON-RPC code used by servers to indicate an unsupported method.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}

pub fn apply_post_headers(
    request: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

pub fn apply_session_id_header(
    request: reqwest::RequestBuilder,
    session_id: Option<&str>,
) -> reqwest::RequestBuilder {
    match session_id {
        Some(session_id) => request.header(MCP_SESSION_ID_HEADER, session_id),
        None => request,
    }
}

/// Static headers from the server entry, applied to every request.
pub fn apply_configured_headers<'a>(
    mut request: reqwest::RequestBuilder,
    headers: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn protocol_header_ignored_when_blank() {
        let client = reqwest::Client::new();
        let req = apply_protocol_version_header(
            client.post("https://example.com"),
            Some("  "),
        )
        .build()
        .expect("request");
        assert!(req.headers().get(MCP_PROTOCOL_VERSION_HEADER).is_none());
    }

    #[test]
    fn post_headers_include_json_and_sse_accept() {
        let client = reqwest::Client::new();
        let mut configured = BTreeMap::new();
        configured.insert("X-Team".to_string(), "infra".to_string());
        let req = apply_configured_headers(
            apply_session_id_header(
                apply_post_headers(client.post("https://example.com")),
                Some("abc"),
            ),
            &configured,
        )
        .build()
        .expect("request");

        assert_eq!(
            req.headers().get("accept").and_then(|v| v.to_str().ok()),
            Some(MCP_JSON_AND_SSE_ACCEPT)
        );
        assert_eq!(
            req.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some(MCP_JSON_CONTENT_TYPE)
        );
        assert_eq!(
            req.headers().get(MCP_SESSION_ID_HEADER).and_then(|v| v.to_str().ok()),
            Some("abc")
        );
        assert_eq!(
            req.headers().get("x-team").and_then(|v| v.to_str().ok()),
            Some("infra")
        );
    }

    #[test]
    fn method_not_found_is_detected() {
        let message: ServerMessage = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "Method not found" }
        }))
        .expect("message");
        assert!(is_method_not_found(&message));
    }
}
