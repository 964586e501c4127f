use crate::mcp::callbacks::CallbackHandler;
use crate::mcp::session::{
    Capabilities, PromptInfo, PromptResult, ResourceContent, ResourceInfo, ResourceTemplateInfo,
    Session, SessionError, SessionEvent, SessionResult, ToolCallOutcome, ToolDefinition,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Failed(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Teardown {
    done: bool,
    monitor: Option<MonitorTask>,
}

/// One named server connection plus its lifecycle bookkeeping.
///
/// The handle owns the background task that drains the session's event
/// stream (server requests, log notifications, stderr) and guarantees the
/// connection is torn down at most once.
pub struct SessionHandle {
    name: String,
    session: Arc<dyn Session>,
    state: SessionState,
    capabilities: Capabilities,
    teardown: Mutex<Teardown>,
}

impl SessionHandle {
    pub fn new(name: impl Into<String>, session: Arc<dyn Session>) -> Self {
        Self {
            name: name.into(),
            session,
            state: SessionState::Uninitialized,
            capabilities: Capabilities::default(),
            teardown: Mutex::new(Teardown::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Capability snapshot captured by `initialize`; all flags are false before.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn transport_label(&self) -> &'static str {
        self.session.transport_label()
    }

    /// Performs the one-time handshake and starts the event monitor.
    ///
    /// With `debug` set, servers advertising the logging capability are asked
    /// to emit debug-level log notifications.
    pub async fn initialize(
        &mut self,
        debug: bool,
        callbacks: Arc<dyn CallbackHandler>,
    ) -> SessionResult<Capabilities> {
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::AlreadyInitialized);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        debug!(server = %self.name, transport = self.transport_label(), "Initializing MCP server");
        let capabilities = match self.session.initialize(events_tx).await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                error!(server = %self.name, error = %err, "Failed to initialize MCP server");
                self.state = SessionState::Failed(err.to_string());
                return Err(err);
            }
        };

        self.capabilities = capabilities;
        self.state = SessionState::Ready;

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_monitor(
            self.name.clone(),
            self.session.clone(),
            callbacks,
            events_rx,
            cancel.clone(),
        ));
        self.teardown.get_mut().monitor = Some(MonitorTask { cancel, join });

        if debug && capabilities.logging {
            if let Err(err) = self.session.set_logging_level("debug").await {
                warn!(server = %self.name, error = %err, "Unable to raise server log level");
            }
        }

        debug!(
            server = %self.name,
            capabilities = %capabilities.summary(),
            "MCP server ready"
        );
        Ok(capabilities)
    }

    /// Stops the monitor and closes the connection. Returns `Ok(false)` when
    /// the handle had already been torn down.
    pub async fn cleanup(&self) -> SessionResult<bool> {
        let mut teardown = self.teardown.lock().await;
        if teardown.done {
            return Ok(false);
        }
        teardown.done = true;

        if let Some(monitor) = teardown.monitor.take() {
            monitor.cancel.cancel();
            if let Err(err) = monitor.join.await {
                debug!(server = %self.name, error = %err, "MCP monitor task ended abnormally");
            }
        }

        debug!(server = %self.name, "Closing MCP server");
        self.session.close().await?;
        Ok(true)
    }

    pub async fn is_closed(&self) -> bool {
        self.teardown.lock().await.done
    }

    fn ensure_ready(&self) -> SessionResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(SessionError::NotReady {
                state: self.state.to_string(),
            })
        }
    }

    pub async fn list_tools(&self) -> SessionResult<Vec<ToolDefinition>> {
        self.ensure_ready()?;
        self.session.list_tools().await
    }

    pub async fn list_resources(&self) -> SessionResult<Vec<ResourceInfo>> {
        self.ensure_ready()?;
        self.session.list_resources().await
    }

    pub async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplateInfo>> {
        self.ensure_ready()?;
        self.session.list_resource_templates().await
    }

    pub async fn list_prompts(&self) -> SessionResult<Vec<PromptInfo>> {
        self.ensure_ready()?;
        self.session.list_prompts().await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> SessionResult<ToolCallOutcome> {
        self.ensure_ready()?;
        debug!(server = %self.name, tool = %name, "Calling MCP tool");
        self.session.call_tool(name, arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContent>> {
        self.ensure_ready()?;
        debug!(server = %self.name, uri = %uri, "Reading MCP resource");
        self.session.read_resource(uri).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> SessionResult<PromptResult> {
        self.ensure_ready()?;
        self.session.get_prompt(name, arguments).await
    }
}

async fn run_monitor(
    server: String,
    session: Arc<dyn Session>,
    callbacks: Arc<dyn CallbackHandler>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SessionEvent::Request { id, method, params } => {
                debug!(server = %server, method = %method, request_id = ?id, "Handling MCP server request");
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = callbacks.handle(&server, &method, params) => outcome,
                };
                if let Err(err) = session.respond(id, outcome).await {
                    warn!(server = %server, method = %method, error = %err, "Unable to answer MCP server request");
                }
            }
            SessionEvent::Notification { method, params } => {
                log_notification(&server, &method, &params);
            }
            SessionEvent::Stderr(line) => {
                debug!(server = %server, "stderr: {line}");
            }
            SessionEvent::Closed(reason) => {
                match reason {
                    Some(reason) => warn!(server = %server, reason = %reason, "MCP server connection closed"),
                    None => debug!(server = %server, "MCP server connection closed"),
                }
                break;
            }
        }
    }
}

fn log_notification(server: &str, method: &str, params: &Value) {
    if method == "notifications/message" {
        let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
        let logger = params.get("logger").and_then(Value::as_str).unwrap_or("");
        let data = match params.get("data") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        debug!(server = %server, level = %level, logger = %logger, "server log: {data}");
    } else {
        debug!(server = %server, method = %method, "MCP server notification");
    }
}
