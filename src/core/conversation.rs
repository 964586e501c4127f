//! The per-turn loop between the model and the connected tools.

use crate::core::history::History;
use crate::core::interaction::Interaction;
use crate::core::message::{ConversationMessage, PendingToolCall, ToolResultEntry};
use crate::core::provider::{CompletionProvider, CompletionRequest, ProviderError};
use crate::mcp::executor::{ToolExecutionError, ToolExecutor};
use crate::mcp::registry::{split_qualified, NameError, ToolRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Tool(#[from] ToolExecutionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("stopped after {rounds} tool rounds without a final answer")]
    RoundLimit { rounds: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered with text, already shown to the user.
    Replied(String),
    /// The turn ended without an answer (empty completion, recoverable
    /// provider error, or a tool batch that produced no results).
    NoReply,
}

pub struct ConversationController {
    provider: Arc<dyn CompletionProvider>,
    interaction: Arc<dyn Interaction>,
    registry: ToolRegistry,
    executor: ToolExecutor,
    history: History,
    max_tool_rounds: usize,
    max_tokens: Option<u32>,
}

impl ConversationController {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        interaction: Arc<dyn Interaction>,
        registry: ToolRegistry,
        executor: ToolExecutor,
        history: History,
    ) -> Self {
        Self {
            provider,
            interaction,
            registry,
            executor,
            history,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_tokens: None,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Appends a message without running a turn, e.g. prompt templates.
    pub fn push_message(&mut self, message: ConversationMessage) {
        self.history.push(message);
    }

    /// Runs one user turn to completion.
    ///
    /// An empty `input` continues from the current history.
    pub async fn run_turn(&mut self, input: &str) -> Result<TurnOutcome, TurnError> {
        if !input.trim().is_empty() {
            self.history.push(ConversationMessage::user(input));
        }
        self.history.prune();

        let mut rounds = 0;
        loop {
            let messages = self.history.messages();
            let tools = self.registry.active_specs();
            let completion = match self
                .provider
                .complete(CompletionRequest {
                    messages: &messages,
                    tools: &tools,
                    max_tokens: self.max_tokens,
                })
                .await
            {
                Ok(Some(completion)) => completion,
                Ok(None) => {
                    debug!("Provider returned no message");
                    return Ok(TurnOutcome::NoReply);
                }
                Err(err) if err.is_recoverable() => {
                    warn!(provider = self.provider.name(), error = %err, "Completion failed");
                    self.interaction.warning(&err.to_string());
                    return Ok(TurnOutcome::NoReply);
                }
                Err(err) => return Err(err.into()),
            };

            if completion.tool_calls.is_empty() {
                let text = completion.visible_text().map(str::to_string);
                self.history.push(ConversationMessage::Assistant {
                    text: completion.text,
                    tool_calls: Vec::new(),
                });
                return Ok(match text {
                    Some(text) => {
                        self.interaction.assistant(&text);
                        TurnOutcome::Replied(text)
                    }
                    None => TurnOutcome::NoReply,
                });
            }

            if rounds >= self.max_tool_rounds {
                warn!(rounds, "Tool round limit reached");
                return Err(TurnError::RoundLimit { rounds });
            }
            rounds += 1;

            self.history.push(ConversationMessage::Assistant {
                text: completion.text,
                tool_calls: completion.tool_calls.clone(),
            });
            let results = self.execute_batch(&completion.tool_calls).await?;
            if results.is_empty() {
                debug!("No tool results; ending turn");
                return Ok(TurnOutcome::NoReply);
            }
            self.history.push(ConversationMessage::ToolResult { results });
        }
    }

    /// Runs the batch in order. Caller errors are logged and their results
    /// omitted; exhausted retries abort the whole batch.
    async fn execute_batch(
        &self,
        calls: &[PendingToolCall],
    ) -> Result<Vec<ToolResultEntry>, TurnError> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            split_qualified(&call.qualified_name)?;
            let tool = match self.registry.resolve(&call.qualified_name) {
                Ok(tool) => tool,
                Err(err) => {
                    warn!(tool = %call.qualified_name, error = %err, "Skipping tool call");
                    continue;
                }
            };

            match self.executor.execute(tool, call.arguments.clone()).await {
                Ok(outcome) => {
                    if outcome.is_error {
                        warn!(tool = %call.qualified_name, "Tool reported an error");
                    } else {
                        info!(tool = %call.qualified_name, "Tool call completed");
                    }
                    results.push(ToolResultEntry {
                        call_id: call.id.clone(),
                        qualified_name: call.qualified_name.clone(),
                        content: outcome.content,
                        is_error: outcome.is_error,
                    });
                }
                Err(err) if err.aborts_turn() => return Err(err.into()),
                Err(err) => {
                    warn!(tool = %call.qualified_name, error = %err, "Skipping tool call");
                }
            }
        }
        Ok(results)
    }
}
