//! Concrete [`Session`] over JSON-RPC 2.0.
//!
//! [`connect`] picks the transport once from the server entry; after that
//! every server looks the same to the rest of the host.

use crate::core::config::data::ServerConfig;
use crate::mcp::session::{
    Capabilities, EventSender, PromptInfo, PromptResult, ResourceContent, ResourceInfo,
    ResourceTemplateInfo, Session, SessionError, SessionResult, ToolCallOutcome, ToolDefinition,
};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{RequestId, RpcError};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub(crate) mod protocol;
mod transport_http;
mod transport_stdio;


use transport_http::HttpTransport;
use transport_stdio::StdioTransport;

const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

fn build_mcp_http_client() -> SessionResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MCP_HTTP_CONNECT_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| SessionError::Transport(err.to_string()))
}

/// Message plumbing underneath an [`McpSession`].
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    /// Opens the connection. Inbound server traffic goes to `events`.
    async fn start(&self, events: EventSender) -> SessionResult<()>;

    async fn request(&self, method: &str, params: Option<Value>) -> SessionResult<ServerMessage>;

    async fn notify(&self, method: &str, params: Option<Value>) -> SessionResult<()>;

    async fn respond(&self, id: RequestId, outcome: Result<Value, RpcError>) -> SessionResult<()>;

    async fn set_protocol_version(&self, _version: &str) {}

    async fn close(&self) -> SessionResult<()>;

    fn label(&self) -> &'static str;
}

/// Builds the session for one configured server. Nothing is opened until
/// [`Session::initialize`].
pub fn connect(name: &str, config: &ServerConfig) -> SessionResult<Arc<dyn Session>> {
    let transport: Box<dyn Transport> = match config {
        ServerConfig::Local { command, args, env } => Box::new(StdioTransport::new(
            name,
            command,
            args,
            env.as_ref(),
        )),
        ServerConfig::Remote { url, headers } => Box::new(HttpTransport::new(
            name,
            url,
            headers,
            build_mcp_http_client()?,
        )),
    };
    Ok(Arc::new(McpSession::new(name, transport)))
}

pub struct McpSession {
    server: String,
    transport: Box<dyn Transport>,
}

impl McpSession {
    pub(crate) fn new(server: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            server: server.to_string(),
            transport,
        }
    }

    async fn call(&self, method: &str, params: Option<Value>) -> SessionResult<Value> {
        let reply = self.transport.request(method, params).await?;
        protocol::parse_response_value(method, reply)
    }

    async fn handshake(&self) -> SessionResult<Capabilities> {
        let reply = self
            .call("initialize", Some(protocol::client_details()))
            .await?;
        let reply = protocol::parse_initialize(reply)?;
        self.transport
            .set_protocol_version(&reply.protocol_version)
            .await;
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        debug!(
            server = %self.server,
            protocol_version = %reply.protocol_version,
            "MCP handshake complete"
        );
        Ok(Capabilities::from_server_capabilities(&reply.capabilities))
    }

    /// Follows `nextCursor` until the server stops returning one.
    async fn list_all<T: DeserializeOwned>(&self, method: &str, key: &str) -> SessionResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .call(method, protocol::paginated_params(cursor.as_deref()))
                .await?;
            let (mut page_items, next_cursor) = protocol::decode_page::<T>(page, key)?;
            items.append(&mut page_items);
            match next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.server, method = %method, count = items.len(), "Listed MCP items");
        Ok(items)
    }
}

#[async_trait]
impl Session for McpSession {
    async fn initialize(&self, events: EventSender) -> SessionResult<Capabilities> {
        self.transport.start(events).await?;
        match self.handshake().await {
            Ok(capabilities) => Ok(capabilities),
            Err(err) => {
                if let Err(close_err) = self.transport.close().await {
                    debug!(server = %self.server, error = %close_err, "Unable to release MCP connection after failed initialize");
                }
                Err(err)
            }
        }
    }

    async fn list_tools(&self) -> SessionResult<Vec<ToolDefinition>> {
        self.list_all("tools/list", "tools").await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> SessionResult<ToolCallOutcome> {
        let value = self
            .call(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        protocol::decode_result(value)
    }

    async fn list_resources(&self) -> SessionResult<Vec<ResourceInfo>> {
        self.list_all("resources/list", "resources").await
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContent>> {
        let value = self
            .call("resources/read", Some(json!({ "uri": uri })))
            .await?;
        let (contents, _) = protocol::decode_page(value, "contents")?;
        Ok(contents)
    }

    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplateInfo>> {
        self.list_all("resources/templates/list", "resourceTemplates")
            .await
    }

    async fn list_prompts(&self) -> SessionResult<Vec<PromptInfo>> {
        self.list_all("prompts/list", "prompts").await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> SessionResult<PromptResult> {
        let value = self
            .call(
                "prompts/get",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        protocol::decode_result(value)
    }

    async fn set_logging_level(&self, level: &str) -> SessionResult<()> {
        self.call("logging/setLevel", Some(json!({ "level": level })))
            .await
            .map(|_| ())
    }

    async fn respond(&self, id: RequestId, outcome: Result<Value, RpcError>) -> SessionResult<()> {
        self.transport.respond(id, outcome).await
    }

    async fn close(&self) -> SessionResult<()> {
        self.transport.close().await
    }

    fn transport_label(&self) -> &'static str {
        self.transport.label()
    }
}
