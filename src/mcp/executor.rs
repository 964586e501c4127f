//! Dispatches qualified tool calls to the owning session.

use crate::mcp::manager::SessionManager;
use crate::mcp::registry::{QualifiedTool, ToolOrigin};
use crate::mcp::session::{ContentItem, SessionError, ToolCallOutcome};
use crate::mcp::template::expand_template;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_TOOL_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// `retries` counts total attempts, not additional ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_TOOL_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolExecutionError {
    #[error("tool '{tool}' belongs to unknown server '{session}'")]
    UnknownSession { tool: String, session: String },
    #[error("tool '{tool}' is missing required argument '{variable}'")]
    MissingArgument { tool: String, variable: String },
    #[error("tool '{tool}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        tool: String,
        attempts: u32,
        #[source]
        source: SessionError,
    },
}

impl ToolExecutionError {
    /// Only exhausted retries end the current turn.
    pub fn aborts_turn(&self) -> bool {
        matches!(self, ToolExecutionError::RetriesExhausted { .. })
    }
}

pub struct ToolExecutor {
    sessions: Arc<SessionManager>,
    policy: RetryPolicy,
}

impl ToolExecutor {
    pub fn new(sessions: Arc<SessionManager>, policy: RetryPolicy) -> Self {
        Self { sessions, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn execute(
        &self,
        tool: &QualifiedTool,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, ToolExecutionError> {
        let qualified = tool.qualified_name();
        let Some(handle) = self.sessions.get(&tool.session) else {
            return Err(ToolExecutionError::UnknownSession {
                tool: qualified,
                session: tool.session.clone(),
            });
        };

        if let ToolOrigin::ResourceTemplate { uri_template, .. } = &tool.origin {
            let uri = expand_template(uri_template, &arguments).map_err(|variable| {
                ToolExecutionError::MissingArgument {
                    tool: qualified.clone(),
                    variable,
                }
            })?;
            info!(tool = %qualified, uri = %uri, "Reading templated resource");
            return Ok(match handle.read_resource(&uri).await {
                Ok(contents) => ToolCallOutcome {
                    content: contents
                        .iter()
                        .map(|content| ContentItem::text(content.as_display_text()))
                        .collect(),
                    is_error: false,
                },
                Err(err) => {
                    warn!(tool = %qualified, uri = %uri, error = %err, "Resource read failed");
                    ToolCallOutcome {
                        content: Vec::new(),
                        is_error: true,
                    }
                }
            });
        }

        let attempts = self.policy.retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(tool = %qualified, attempt, "Executing tool");
            match handle.call_tool(&tool.local_name, arguments.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    warn!(tool = %qualified, error = %err, "Error executing tool. Attempt {attempt} of {attempts}.");
                    if attempt >= attempts {
                        error!(tool = %qualified, "Max retries reached. Failing.");
                        return Err(ToolExecutionError::RetriesExhausted {
                            tool: qualified,
                            attempts,
                            source: err,
                        });
                    }
                    info!(tool = %qualified, delay_ms = self.policy.delay.as_millis() as u64, "Retrying tool call");
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::registry::ToolRegistry;
    use crate::mcp::session::Capabilities;
    use crate::mcp::testing::{RecordingCallbacks, ScriptedSession};
    use serde_json::json;

    fn caps() -> Capabilities {
        Capabilities {
            tools: true,
            resources: true,
            ..Capabilities::default()
        }
    }

    async fn ready_manager(sessions: Vec<(&str, ScriptedSession)>) -> Arc<SessionManager> {
        let mut manager = SessionManager::new();
        for (name, session) in sessions {
            manager.add(name, Arc::new(session.with_capabilities(caps())));
        }
        manager
            .initialize_all(false, Arc::new(RecordingCallbacks::default()))
            .await
            .expect("initialize");
        Arc::new(manager)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    fn transport_failure() -> Result<ToolCallOutcome, SessionError> {
        Err(SessionError::Transport("broken pipe".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_delay() {
        let session = ScriptedSession::new()
            .with_tools(&["flaky"])
            .with_call_results(vec![
                transport_failure(),
                transport_failure(),
                Ok(ToolCallOutcome {
                    content: vec![ContentItem::text("finally")],
                    is_error: false,
                }),
            ]);
        let manager = ready_manager(vec![("srv", session.clone())]).await;
        let registry = ToolRegistry::build_from(&manager).await.expect("registry");
        let executor = ToolExecutor::new(
            manager,
            RetryPolicy {
                retries: 3,
                delay: Duration::from_secs(1),
            },
        );

        let started = tokio::time::Instant::now();
        let outcome = executor
            .execute(registry.resolve("srv__flaky").expect("tool"), Map::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(outcome.content, vec![ContentItem::text("finally")]);
        assert_eq!(session.call_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_abort_the_turn() {
        let session = ScriptedSession::new()
            .with_tools(&["down"])
            .with_call_results(vec![transport_failure(), transport_failure(), transport_failure()]);
        let manager = ready_manager(vec![("srv", session.clone())]).await;
        let registry = ToolRegistry::build_from(&manager).await.expect("registry");
        let executor = ToolExecutor::new(manager, RetryPolicy::default());

        let err = executor
            .execute(registry.resolve("srv__down").expect("tool"), Map::new())
            .await
            .expect_err("exhausted");
        assert!(err.aborts_turn());
        assert!(matches!(err, ToolExecutionError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn same_local_name_reaches_its_own_server() {
        let a = ScriptedSession::new().with_tools(&["search"]);
        let b = ScriptedSession::new().with_tools(&["search"]);
        let manager = ready_manager(vec![("a", a.clone()), ("b", b.clone())]).await;
        let registry = ToolRegistry::build_from(&manager).await.expect("registry");
        let executor = ToolExecutor::new(manager, RetryPolicy::default());

        executor
            .execute(registry.resolve("b__search").expect("b"), args(json!({ "q": "rust" })))
            .await
            .expect("b call");

        assert_eq!(a.call_count(), 0);
        assert_eq!(b.calls(), vec![("search".to_string(), args(json!({ "q": "rust" })))]);
    }

    #[tokio::test]
    async fn unknown_session_fails_before_any_call() {
        let session = ScriptedSession::new().with_tools(&["echo"]);
        let manager = ready_manager(vec![("srv", session.clone())]).await;
        let executor = ToolExecutor::new(manager, RetryPolicy::default());
        let stray = QualifiedTool {
            session: "ghost".to_string(),
            local_name: "echo".to_string(),
            description: String::new(),
            input_schema: json!({}),
            origin: ToolOrigin::Native,
        };

        let err = executor.execute(&stray, Map::new()).await.expect_err("unknown");
        assert!(matches!(err, ToolExecutionError::UnknownSession { .. }));
        assert!(!err.aborts_turn());
        assert_eq!(session.call_count(), 0);
    }

    #[tokio::test]
    async fn template_tools_read_the_expanded_uri() {
        let session = ScriptedSession::new()
            .with_templates(&["https://x/{a}/{b}"])
            .with_content("https://x/1/2", "resolved body");
        let manager = ready_manager(vec![("web", session.clone())]).await;
        let registry = ToolRegistry::build_from(&manager).await.expect("registry");
        let executor = ToolExecutor::new(manager, RetryPolicy::default());
        let tool = registry.resolve("web__resource_template_0").expect("pseudo-tool");

        let outcome = executor
            .execute(tool, args(json!({ "a": "1", "b": "2" })))
            .await
            .expect("read");
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, vec![ContentItem::text("resolved body")]);
        assert_eq!(session.reads(), vec!["https://x/1/2".to_string()]);

        let err = executor
            .execute(tool, args(json!({ "a": "1" })))
            .await
            .expect_err("missing b");
        assert_eq!(
            err,
            ToolExecutionError::MissingArgument {
                tool: "web__resource_template_0".to_string(),
                variable: "b".to_string(),
            }
        );
        assert_eq!(session.reads().len(), 1);
    }

    #[tokio::test]
    async fn query_template_reads_omit_absent_parameters() {
        let session = ScriptedSession::new()
            .with_templates(&["https://x/items{/id}{?q,limit}"])
            .with_content("https://x/items/7?q=rust&limit=5", "filtered")
            .with_content("https://x/items/7", "all");
        let manager = ready_manager(vec![("web", session.clone())]).await;
        let registry = ToolRegistry::build_from(&manager).await.expect("registry");
        let executor = ToolExecutor::new(manager, RetryPolicy::default());
        let tool = registry.resolve("web__resource_template_0").expect("pseudo-tool");

        let outcome = executor
            .execute(tool, args(json!({ "id": "7", "q": "rust", "limit": "5" })))
            .await
            .expect("read");
        assert_eq!(outcome.content, vec![ContentItem::text("filtered")]);

        let outcome = executor
            .execute(tool, args(json!({ "id": "7" })))
            .await
            .expect("read without query");
        assert_eq!(outcome.content, vec![ContentItem::text("all")]);
        assert_eq!(
            session.reads(),
            vec![
                "https://x/items/7?q=rust&limit=5".to_string(),
                "https://x/items/7".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failed_template_read_is_an_error_result() {
        let session = ScriptedSession::new().with_templates(&["https://x/{id}"]);
        let manager = ready_manager(vec![("web", session.clone())]).await;
        let registry = ToolRegistry::build_from(&manager).await.expect("registry");
        let executor = ToolExecutor::new(manager, RetryPolicy::default());

        let outcome = executor
            .execute(
                registry.resolve("web__resource_template_0").expect("tool"),
                args(json!({ "id": "404" })),
            )
            .await
            .expect("wrapped failure");
        assert!(outcome.is_error);
        assert!(outcome.content.is_empty());
        assert_eq!(session.reads().len(), 1);
    }
}
