use super::protocol;
use super::Transport;
use crate::mcp::session::{EventSender, SessionError, SessionResult};
use crate::mcp::transport::streamable_http::{
    is_event_stream_content_type, next_sse_reply, route_payload,
};
use crate::mcp::transport::{
    apply_configured_headers, apply_session_id_header, apply_post_headers,
    apply_protocol_version_header, MCP_SESSION_ID_HEADER,
};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{RequestId, RpcError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct HttpSessionState {
    session_id: Option<String>,
    protocol_version: Option<String>,
    events: Option<EventSender>,
}

/// Streamable HTTP endpoint: every message is one POST.
pub(crate) struct HttpTransport {
    server: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
    next_request_id: AtomicI64,
    state: RwLock<HttpSessionState>,
}

impl HttpTransport {
    pub(crate) fn new(
        server: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            server: server.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            client,
            next_request_id: AtomicI64::new(0),
            state: RwLock::new(HttpSessionState::default()),
        }
    }

    async fn post(&self, body: &Value) -> SessionResult<reqwest::Response> {
        let (session_id, protocol_version) = {
            let state = self.state.read().await;
            (
                state.session_id.clone(),
                protocol::effective_protocol_version(state.protocol_version.as_deref()),
            )
        };

        let request = apply_post_headers(self.client.post(&self.url));
        let request =
            apply_protocol_version_header(request, Some(protocol_version.as_str()));
        let request = apply_session_id_header(request, session_id.as_deref());
        let request = apply_configured_headers(request, &self.headers).json(body);

        let response = request
            .send()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        debug!(server = %self.server, status = %response.status(), "Received MCP HTTP response");
        if !response.status().is_success() {
            return Err(SessionError::Transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.state.write().await.session_id = Some(session_id.to_string());
        }
        Ok(response)
    }

    async fn events(&self) -> Option<EventSender> {
        self.state.read().await.events.clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self, events: EventSender) -> SessionResult<()> {
        let mut state = self.state.write().await;
        if state.events.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }
        state.events = Some(events);
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> SessionResult<ServerMessage> {
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        debug!(server = %self.server, request_id = ?request_id, method = %method, url = %self.url, "Sending MCP HTTP request");
        let response = self
            .post(&protocol::request_message(&request_id, method, params))
            .await?;
        let events = self.events().await;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if is_event_stream_content_type(&content_type) {
            return next_sse_reply(response, &request_id, events.as_ref()).await;
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        let value = serde_json::from_slice::<Value>(&body)
            .map_err(|err| SessionError::Protocol(err.to_string()))?;
        route_payload(value, &request_id, events.as_ref()).ok_or_else(|| {
            SessionError::Protocol(format!("Missing response for {method}."))
        })
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> SessionResult<()> {
        self.post(&protocol::notification_message(method, params))
            .await
            .map(|_| ())
    }

    async fn respond(&self, id: RequestId, outcome: Result<Value, RpcError>) -> SessionResult<()> {
        self.post(&protocol::response_message(&id, outcome))
            .await
            .map(|_| ())
    }

    async fn set_protocol_version(&self, version: &str) {
        self.state.write().await.protocol_version = Some(version.to_string());
    }

    async fn close(&self) -> SessionResult<()> {
        let session_id = {
            let mut state = self.state.write().await;
            state.events = None;
            state.session_id.take()
        };
        let Some(session_id) = session_id else {
            return Ok(());
        };

        debug!(server = %self.server, "Ending MCP HTTP session");
        let request = apply_session_id_header(self.client.delete(&self.url), Some(&session_id));
        let response = apply_configured_headers(request, &self.headers)
            .send()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            debug!(server = %self.server, "MCP server does not support session termination");
        }
        Ok(())
    }

    fn label(&self) -> &'static str {
        "http"
    }
}
