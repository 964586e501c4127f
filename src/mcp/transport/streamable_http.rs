use crate::mcp::client::protocol::{decode_inbound, Inbound};
use crate::mcp::session::{EventSender, SessionError};
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::RequestId;
use serde_json::Value;
use tracing::debug;

/// Splits a byte stream into trimmed, non-empty lines.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            push_trimmed(&mut lines, &self.buffer[search_index..line_end]);
            search_index = newline_index + 1;
        }

        if flush {
            push_trimmed(&mut lines, &self.buffer[search_index..]);
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

fn push_trimmed(lines: &mut Vec<String>, bytes: &[u8]) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Routes one decoded payload. Returns the reply for `expected` if present;
/// everything else is published on `events`.
pub(crate) fn route_payload(
    value: Value,
    expected: &RequestId,
    events: Option<&EventSender>,
) -> Option<ServerMessage> {
    let mut reply = None;
    for inbound in decode_inbound(value) {
        match inbound {
            Inbound::Reply(id, message) if &id == expected => reply = Some(message),
            Inbound::Reply(id, _) => {
                debug!(response_id = ?id, "Ignoring MCP HTTP reply for another request");
            }
            Inbound::Event(event) => {
                if let Some(events) = events {
                    let _ = events.send(event);
                }
            }
        }
    }
    reply
}

/// Scans an event-stream body until the reply to `expected` arrives.
/// Server requests and notifications interleaved before it are forwarded.
pub(crate) async fn next_sse_reply(
    response: reqwest::Response,
    expected: &RequestId,
    events: Option<&EventSender>,
) -> Result<ServerMessage, SessionError> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| SessionError::Transport(err.to_string()))?;
        for line in buffer.push(&chunk) {
            if let Some(reply) = scan_line(&line, expected, events)? {
                return Ok(reply);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(reply) = scan_line(&line, expected, events)? {
            return Ok(reply);
        }
    }

    Err(SessionError::Protocol(
        "Empty event-stream response.".to_string(),
    ))
}

fn scan_line(
    line: &str,
    expected: &RequestId,
    events: Option<&EventSender>,
) -> Result<Option<ServerMessage>, SessionError> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str::<Value>(payload)
        .map_err(|err| SessionError::Protocol(err.to_string()))?;
    Ok(route_payload(value, expected, events))
}
