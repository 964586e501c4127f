use super::protocol::{self, decode_inbound, Inbound};
use super::Transport;
use crate::mcp::session::{EventSender, SessionError, SessionEvent, SessionResult};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{RequestId, RpcError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::debug;

pub(crate) const STDIO_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const STDIO_CALLBACK_TIMEOUT_MULTIPLIER: u32 = 5;
const STDIO_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;
type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-delimited JSON-RPC over a reader/writer pair.
///
/// Replies are matched to waiting requests by id. Everything else the server
/// sends is published as a [`SessionEvent`]. Waits restart on server activity
/// and are stretched while a server→client request is outstanding.
pub(crate) struct StdioChannel {
    server: String,
    writer: Mutex<LineWriter>,
    pending: Pending,
    next_request_id: AtomicI64,
    activity: Arc<Notify>,
    inflight_server_requests: Arc<AtomicI64>,
    request_timeout: Duration,
}

impl StdioChannel {
    pub(crate) fn start<R, W>(
        server: &str,
        reader: R,
        writer: W,
        events: EventSender,
        request_timeout: Duration,
    ) -> Arc<Self>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let channel = Arc::new(Self {
            server: server.to_string(),
            writer: Mutex::new(Box::new(writer)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicI64::new(0),
            activity: Arc::new(Notify::new()),
            inflight_server_requests: Arc::new(AtomicI64::new(0)),
            request_timeout,
        });

        tokio::spawn(read_lines(
            channel.server.clone(),
            reader,
            channel.pending.clone(),
            events,
            channel.activity.clone(),
            channel.inflight_server_requests.clone(),
        ));
        channel
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    fn timeout_for_wait(&self) -> Duration {
        if self.inflight_server_requests.load(Ordering::SeqCst) > 0 {
            self.request_timeout * STDIO_CALLBACK_TIMEOUT_MULTIPLIER
        } else {
            self.request_timeout
        }
    }

    fn decrement_inflight(&self) -> i64 {
        let mut current = self.inflight_server_requests.load(Ordering::SeqCst);
        while current > 0 {
            match self.inflight_server_requests.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return current - 1,
                Err(next) => current = next,
            }
        }
        current
    }

    async fn write_line(&self, message: &Value) -> SessionResult<()> {
        let payload =
            serde_json::to_string(message).map_err(|err| SessionError::Protocol(err.to_string()))?;
        let mut writer = tokio::time::timeout(STDIO_WRITE_TIMEOUT, self.writer.lock())
            .await
            .map_err(|_| SessionError::Transport("Timed out waiting for MCP stdin.".to_string()))?;
        debug!(server = %self.server, bytes = payload.len(), "Writing MCP stdio message");

        for chunk in [payload.as_bytes(), b"\n".as_slice()] {
            tokio::time::timeout(STDIO_WRITE_TIMEOUT, writer.write_all(chunk))
                .await
                .map_err(|_| SessionError::Transport("Timed out writing MCP stdin.".to_string()))?
                .map_err(|err| SessionError::Transport(err.to_string()))?;
        }
        tokio::time::timeout(STDIO_WRITE_TIMEOUT, writer.flush())
            .await
            .map_err(|_| SessionError::Transport("Timed out flushing MCP stdin.".to_string()))?
            .map_err(|err| SessionError::Transport(err.to_string()))
    }

    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> SessionResult<ServerMessage> {
        let request_id = self.next_request_id();
        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        debug!(server = %self.server, request_id = ?request_id, method = %method, "Sending MCP stdio request");
        if let Err(err) = self
            .write_line(&protocol::request_message(&request_id, method, params))
            .await
        {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        let mut timeout = self.timeout_for_wait();
        let mut deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                result = &mut rx => {
                    return result.map_err(|_| {
                        debug!(server = %self.server, request_id = ?request_id, "MCP stdio response channel closed");
                        SessionError::Closed
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(
                        server = %self.server,
                        request_id = ?request_id,
                        timeout_secs = timeout.as_secs(),
                        "MCP stdio request timed out"
                    );
                    self.pending.lock().await.remove(&request_id);
                    return Err(SessionError::Timeout);
                }
                _ = self.activity.notified() => {
                    timeout = self.timeout_for_wait();
                    deadline = tokio::time::Instant::now() + timeout;
                    debug!(
                        server = %self.server,
                        request_id = ?request_id,
                        timeout_secs = timeout.as_secs(),
                        "MCP stdio timeout reset after server activity"
                    );
                }
            }
        }
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> SessionResult<()> {
        self.write_line(&protocol::notification_message(method, params))
            .await
    }

    pub(crate) async fn respond(
        &self,
        id: RequestId,
        outcome: Result<Value, RpcError>,
    ) -> SessionResult<()> {
        let message = protocol::response_message(&id, outcome);
        self.write_line(&message).await?;
        let inflight = self.decrement_inflight();
        debug!(
            server = %self.server,
            request_id = ?id,
            inflight_server_requests = inflight,
            "Answered MCP server request"
        );
        self.activity.notify_waiters();
        Ok(())
    }

    /// Fails every waiting request with [`SessionError::Closed`].
    pub(crate) async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }
}

async fn read_lines<R>(
    server: String,
    reader: R,
    pending: Pending,
    events: EventSender,
    activity: Arc<Notify>,
    inflight_server_requests: Arc<AtomicI64>,
) where
    R: AsyncBufRead + Send + Unpin,
{
    let mut lines = reader.lines();
    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break None,
            Err(err) => break Some(err.to_string()),
        };
        let value = match serde_json::from_str::<Value>(&line) {
            Ok(value) => value,
            Err(_) => {
                debug!(server = %server, "Skipping non-JSON MCP stdout line");
                continue;
            }
        };

        for inbound in decode_inbound(value) {
            match inbound {
                Inbound::Reply(id, message) => {
                    debug!(server = %server, response_id = ?id, "Received MCP stdio response");
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(message);
                    }
                }
                Inbound::Event(event) => {
                    if matches!(event, SessionEvent::Request { .. }) {
                        let inflight = inflight_server_requests.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!(server = %server, inflight_server_requests = inflight, "Received MCP stdio request");
                    }
                    activity.notify_waiters();
                    let _ = events.send(event);
                }
            }
        }
    };

    pending.lock().await.clear();
    let _ = events.send(SessionEvent::Closed(reason));
}

fn forward_stderr<R>(reader: R, events: EventSender)
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if events.send(SessionEvent::Stderr(line)).is_err() {
                break;
            }
        }
    });
}

struct Running {
    child: Child,
    channel: Arc<StdioChannel>,
}

/// Child process speaking MCP over its stdin/stdout.
pub(crate) struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: Option<BTreeMap<String, String>>,
    running: Mutex<Option<Running>>,
}

impl StdioTransport {
    pub(crate) fn new(
        server: &str,
        command: &str,
        args: &[String],
        env: Option<&BTreeMap<String, String>>,
    ) -> Self {
        Self {
            server: server.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            env: env.cloned(),
            running: Mutex::new(None),
        }
    }

    async fn channel(&self) -> SessionResult<Arc<StdioChannel>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.channel.clone())
            .ok_or(SessionError::Closed)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self, events: EventSender) -> SessionResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }

        debug!(server = %self.server, command = %self.command, args = ?self.args, "Starting MCP stdio server");
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = &self.env {
            command.envs(env);
        }

        let mut child = command
            .spawn()
            .map_err(|err| SessionError::Transport(format!("{}: {err}", self.command)))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(SessionError::Transport(
                "Unable to capture MCP server stdio.".to_string(),
            ));
        };

        forward_stderr(BufReader::new(stderr), events.clone());
        let channel = StdioChannel::start(
            &self.server,
            BufReader::new(stdout),
            stdin,
            events,
            STDIO_REQUEST_TIMEOUT,
        );
        *running = Some(Running { child, channel });
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> SessionResult<ServerMessage> {
        self.channel().await?.request(method, params).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> SessionResult<()> {
        self.channel().await?.notify(method, params).await
    }

    async fn respond(&self, id: RequestId, outcome: Result<Value, RpcError>) -> SessionResult<()> {
        self.channel().await?.respond(id, outcome).await
    }

    async fn close(&self) -> SessionResult<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.channel.fail_pending().await;
        if let Err(err) = running.child.start_kill() {
            debug!(server = %self.server, error = %err, "MCP stdio server already exited");
        }
        let status = running
            .child
            .wait()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        debug!(server = %self.server, status = %status, "MCP stdio server stopped");
        Ok(())
    }

    fn label(&self) -> &'static str {
        "stdio"
    }
}
