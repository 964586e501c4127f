//! Scripted collaborators for unit tests: sessions, callbacks, providers and
//! user interaction that replay canned behaviour and record what they saw.

use crate::core::interaction::{Interaction, UserInput};
use crate::core::message::ConversationMessage;
use crate::core::provider::{Completion, CompletionProvider, CompletionRequest, ProviderError, ToolSpec};
use crate::mcp::callbacks::CallbackHandler;
use crate::mcp::session::{
    Capabilities, ContentItem, EventSender, PromptInfo, PromptMessage, PromptResult,
    ResourceContent, ResourceInfo, ResourceTemplateInfo, Session, SessionError, SessionEvent,
    SessionResult, ToolCallOutcome, ToolDefinition,
};
use async_trait::async_trait;
use rust_mcp_schema::{RequestId, RpcError};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub type CloseLog = Arc<Mutex<Vec<String>>>;

pub type RecordedResponse = (RequestId, Result<Value, (i64, String)>);

#[derive(Default)]
struct SessionScript {
    capabilities: Capabilities,
    init_error: Option<String>,
    close_error: Option<String>,
    tools: Vec<ToolDefinition>,
    resources: Vec<ResourceInfo>,
    templates: Option<Vec<ResourceTemplateInfo>>,
    prompts: Vec<PromptInfo>,
    contents: HashMap<String, String>,
    call_results: VecDeque<SessionResult<ToolCallOutcome>>,
    calls: Vec<(String, Map<String, Value>)>,
    reads: Vec<String>,
    prompt_requests: Vec<(String, HashMap<String, String>)>,
    logging_levels: Vec<String>,
    responses: Vec<RecordedResponse>,
    events: Option<EventSender>,
    close_count: usize,
    close_log: Option<(String, CloseLog)>,
}

/// In-memory [`Session`]. Clones share state, so a test keeps one clone for
/// assertions while the code under test owns another.
#[derive(Clone)]
pub struct ScriptedSession {
    script: Arc<Mutex<SessionScript>>,
    responded: Arc<Notify>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        let script = SessionScript {
            templates: Some(Vec::new()),
            ..SessionScript::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            responded: Arc::new(Notify::new()),
        }
    }

    fn edit(self, apply: impl FnOnce(&mut SessionScript)) -> Self {
        apply(&mut self.script.lock().expect("script lock"));
        self
    }

    fn read<T>(&self, view: impl FnOnce(&SessionScript) -> T) -> T {
        view(&self.script.lock().expect("script lock"))
    }

    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        self.edit(|script| script.capabilities = capabilities)
    }

    pub fn failing_initialize(self, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|script| script.init_error = Some(message))
    }

    pub fn failing_close(self, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|script| script.close_error = Some(message))
    }

    pub fn with_tools(self, names: &[&str]) -> Self {
        let tools = names
            .iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: Some(format!("{name} tool")),
                input_schema: json!({ "type": "object", "properties": {} }),
            })
            .collect();
        self.edit(|script| script.tools = tools)
    }

    pub fn with_tool_definitions(self, tools: Vec<ToolDefinition>) -> Self {
        self.edit(|script| script.tools = tools)
    }

    pub fn with_templates(self, templates: &[&str]) -> Self {
        let templates = templates
            .iter()
            .enumerate()
            .map(|(index, template)| ResourceTemplateInfo {
                uri_template: template.to_string(),
                name: format!("template {index}"),
                description: None,
                mime_type: None,
            })
            .collect();
        self.edit(|script| script.templates = Some(templates))
    }

    /// `resources/templates/list` answers with method-not-found.
    pub fn without_template_support(self) -> Self {
        self.edit(|script| script.templates = None)
    }

    pub fn with_resource(self, uri: &str, text: &str) -> Self {
        let info = ResourceInfo {
            uri: uri.to_string(),
            name: uri.rsplit('/').next().unwrap_or(uri).to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        };
        let (uri, text) = (uri.to_string(), text.to_string());
        self.edit(|script| {
            script.resources.push(info);
            script.contents.insert(uri, text);
        })
    }

    /// Content served by `read_resource` without listing the URI.
    pub fn with_content(self, uri: &str, text: &str) -> Self {
        let (uri, text) = (uri.to_string(), text.to_string());
        self.edit(|script| {
            script.contents.insert(uri, text);
        })
    }

    pub fn with_prompt(self, prompt: PromptInfo) -> Self {
        self.edit(|script| script.prompts.push(prompt))
    }

    /// Queued `call_tool` outcomes; once drained, calls echo their arguments.
    pub fn with_call_results(self, results: Vec<SessionResult<ToolCallOutcome>>) -> Self {
        self.edit(|script| script.call_results = results.into())
    }

    pub fn with_close_log(self, name: &str, log: &CloseLog) -> Self {
        let entry = (name.to_string(), log.clone());
        self.edit(|script| script.close_log = Some(entry))
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.read(|script| script.calls.clone())
    }

    pub fn call_count(&self) -> usize {
        self.read(|script| script.calls.len())
    }

    pub fn reads(&self) -> Vec<String> {
        self.read(|script| script.reads.clone())
    }

    pub fn prompt_requests(&self) -> Vec<(String, HashMap<String, String>)> {
        self.read(|script| script.prompt_requests.clone())
    }

    pub fn logging_levels(&self) -> Vec<String> {
        self.read(|script| script.logging_levels.clone())
    }

    pub fn close_count(&self) -> usize {
        self.read(|script| script.close_count)
    }

    /// Publishes an event as if the server had sent it.
    pub fn emit(&self, event: SessionEvent) {
        let sender = self.read(|script| script.events.clone());
        sender
            .expect("session initialized")
            .send(event)
            .expect("monitor running");
    }

    pub async fn wait_for_responses(&self, count: usize) -> Vec<RecordedResponse> {
        loop {
            let notified = self.responded.notified();
            let responses = self.read(|script| script.responses.clone());
            if responses.len() >= count {
                return responses;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn initialize(&self, events: EventSender) -> SessionResult<Capabilities> {
        let mut script = self.script.lock().expect("script lock");
        if let Some(message) = script.init_error.clone() {
            return Err(SessionError::Transport(message));
        }
        script.events = Some(events);
        Ok(script.capabilities)
    }

    async fn list_tools(&self) -> SessionResult<Vec<ToolDefinition>> {
        Ok(self.read(|script| script.tools.clone()))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> SessionResult<ToolCallOutcome> {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push((name.to_string(), arguments.clone()));
        match script.call_results.pop_front() {
            Some(result) => result,
            None => Ok(ToolCallOutcome {
                content: vec![ContentItem::text(format!(
                    "{name}: {}",
                    Value::Object(arguments)
                ))],
                is_error: false,
            }),
        }
    }

    async fn list_resources(&self) -> SessionResult<Vec<ResourceInfo>> {
        Ok(self.read(|script| script.resources.clone()))
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContent>> {
        let mut script = self.script.lock().expect("script lock");
        script.reads.push(uri.to_string());
        match script.contents.get(uri) {
            Some(text) => Ok(vec![ResourceContent {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text: Some(text.clone()),
                blob: None,
            }]),
            None => Err(SessionError::Rpc {
                code: -32002,
                message: format!("Resource not found: {uri}"),
            }),
        }
    }

    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplateInfo>> {
        self.read(|script| script.templates.clone())
            .ok_or_else(|| SessionError::MethodNotFound {
                method: "resources/templates/list".to_string(),
            })
    }

    async fn list_prompts(&self) -> SessionResult<Vec<PromptInfo>> {
        Ok(self.read(|script| script.prompts.clone()))
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> SessionResult<PromptResult> {
        let mut script = self.script.lock().expect("script lock");
        script
            .prompt_requests
            .push((name.to_string(), arguments.clone()));
        let mut keys: Vec<_> = arguments.iter().collect();
        keys.sort();
        let rendered = keys
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(PromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: ContentItem::text(format!("{name}({rendered})")),
            }],
        })
    }

    async fn set_logging_level(&self, level: &str) -> SessionResult<()> {
        let level = level.to_string();
        self.script
            .lock()
            .expect("script lock")
            .logging_levels
            .push(level);
        Ok(())
    }

    async fn respond(&self, id: RequestId, outcome: Result<Value, RpcError>) -> SessionResult<()> {
        let outcome = outcome.map_err(|err| (err.code, err.message));
        self.script
            .lock()
            .expect("script lock")
            .responses
            .push((id, outcome));
        self.responded.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        let mut script = self.script.lock().expect("script lock");
        script.close_count += 1;
        script.events = None;
        if let Some((name, log)) = &script.close_log {
            log.lock().expect("close log").push(name.clone());
        }
        match script.close_error.clone() {
            Some(message) => Err(SessionError::Transport(message)),
            None => Ok(()),
        }
    }

    fn transport_label(&self) -> &'static str {
        "scripted"
    }
}

/// Callback handler that answers every request with one canned value.
pub struct RecordingCallbacks {
    answer: Value,
    seen: Mutex<Vec<(String, String)>>,
}

impl Default for RecordingCallbacks {
    fn default() -> Self {
        Self::answering(json!({}))
    }
}

impl RecordingCallbacks {
    pub fn answering(answer: Value) -> Self {
        Self {
            answer,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn methods(&self) -> Vec<(String, String)> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl CallbackHandler for RecordingCallbacks {
    async fn handle(&self, server: &str, method: &str, _params: Value) -> Result<Value, RpcError> {
        self.seen
            .lock()
            .expect("seen lock")
            .push((server.to_string(), method.to_string()));
        Ok(self.answer.clone())
    }
}

/// Owned copy of one [`CompletionRequest`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<u32>,
}

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Option<Completion>, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<Option<Completion>, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<Option<Completion>, ProviderError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                messages: request.messages.to_vec(),
                tools: request.tools.to_vec(),
                max_tokens: request.max_tokens,
            });
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".to_string())))
    }
}

/// Replays queued input; reports [`UserInput::Closed`] once drained.
#[derive(Default)]
pub struct ScriptedInteraction {
    inputs: Mutex<VecDeque<UserInput>>,
    assistant: Mutex<Vec<String>>,
    info: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl ScriptedInteraction {
    pub fn new(inputs: Vec<UserInput>) -> Self {
        Self {
            inputs: Mutex::new(inputs.into()),
            ..Self::default()
        }
    }

    pub fn lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            lines
                .into_iter()
                .map(|line| UserInput::Line(line.to_string()))
                .collect(),
        )
    }

    pub fn assistant_messages(&self) -> Vec<String> {
        self.assistant.lock().expect("assistant lock").clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.info.lock().expect("info lock").clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().expect("warnings lock").clone()
    }
}

#[async_trait]
impl Interaction for ScriptedInteraction {
    fn assistant(&self, text: &str) {
        self.assistant
            .lock()
            .expect("assistant lock")
            .push(text.to_string());
    }

    fn info(&self, text: &str) {
        self.info.lock().expect("info lock").push(text.to_string());
    }

    fn warning(&self, text: &str) {
        self.warnings
            .lock()
            .expect("warnings lock")
            .push(text.to_string());
    }

    async fn read_line(&self, _prompt: &str) -> UserInput {
        self.inputs
            .lock()
            .expect("inputs lock")
            .pop_front()
            .unwrap_or(UserInput::Closed)
    }
}
