use super::{rpc_error, RPC_INVALID_REQUEST, RPC_USER_REJECTED};
use crate::core::interaction::{Interaction, UserInput};
use crate::core::message::ConversationMessage;
use crate::core::provider::{CompletionProvider, CompletionRequest};
use rust_mcp_schema::{
    CreateMessageContent, CreateMessageRequestParams, CreateMessageResult, Role, RpcError,
    SamplingMessageContent, SamplingMessageContentBlock, TextContent,
};
use serde_json::Value;
use tracing::{debug, warn};

const STOP_REASON_END_TURN: &str = "endTurn";

/// Serves `sampling/createMessage` after explicit user approval.
pub async fn handle_sampling(
    provider: &dyn CompletionProvider,
    interaction: &dyn Interaction,
    server: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let params: CreateMessageRequestParams = serde_json::from_value(params)
        .map_err(|err| RpcError::invalid_params().with_message(&err.to_string()))?;
    let messages = build_sampling_messages(&params)
        .map_err(|err| RpcError::invalid_params().with_message(&err))?;

    interaction.info(&describe_request(server, &params));
    if !ask_approval(interaction).await {
        debug!(server = %server, "Sampling request rejected by user");
        return Err(rpc_error(RPC_USER_REJECTED, "User rejected the sampling request"));
    }

    let max_tokens = u32::try_from(params.max_tokens).ok().filter(|value| *value > 0);
    let completion = provider
        .complete(CompletionRequest {
            messages: &messages,
            tools: &[],
            max_tokens,
        })
        .await
        .map_err(|err| {
            warn!(server = %server, error = %err, "Sampling completion failed");
            RpcError::internal_error().with_message(&err.to_string())
        })?;

    let Some(text) = completion
        .as_ref()
        .and_then(|completion| completion.visible_text())
        .map(str::to_string)
    else {
        return Err(rpc_error(RPC_INVALID_REQUEST, "Completion returned no content"));
    };

    let result = CreateMessageResult {
        content: CreateMessageContent::from(TextContent::new(text, None, None)),
        meta: None,
        model: provider.model().to_string(),
        role: Role::Assistant,
        stop_reason: Some(STOP_REASON_END_TURN.to_string()),
    };
    serde_json::to_value(&result)
        .map_err(|err| RpcError::internal_error().with_message(&err.to_string()))
}

/// System prompt first (when non-blank), then the requested messages.
pub fn build_sampling_messages(
    params: &CreateMessageRequestParams,
) -> Result<Vec<ConversationMessage>, String> {
    let mut messages = Vec::new();
    if let Some(system_prompt) = params.system_prompt.as_ref() {
        if !system_prompt.trim().is_empty() {
            messages.push(ConversationMessage::system(system_prompt.clone()));
        }
    }

    for message in &params.messages {
        let content = sampling_content_to_text(&message.content)?;
        messages.push(match message.role {
            Role::User => ConversationMessage::user(content),
            Role::Assistant => ConversationMessage::assistant_text(content),
        });
    }

    Ok(messages)
}

fn sampling_content_to_text(content: &SamplingMessageContent) -> Result<String, String> {
    match content {
        SamplingMessageContent::TextContent(text) => Ok(text.text.clone()),
        SamplingMessageContent::SamplingMessageContentBlock(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                parts.push(sampling_block_to_text(block)?);
            }
            Ok(parts.join("\n"))
        }
        _ => Err("Sampling content must be text-only.".to_string()),
    }
}

fn sampling_block_to_text(block: &SamplingMessageContentBlock) -> Result<String, String> {
    match block {
        SamplingMessageContentBlock::TextContent(TextContent { text, .. }) => Ok(text.clone()),
        _ => Err("Sampling content blocks must be text-only.".to_string()),
    }
}

fn describe_request(server: &str, params: &CreateMessageRequestParams) -> String {
    let messages = serde_json::to_string_pretty(&params.messages)
        .unwrap_or_else(|_| "[unavailable]".to_string());
    let system_prompt = params
        .system_prompt
        .as_deref()
        .map(summarize_prompt)
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Server '{server}' requests a completion ({} messages, maxTokens: {}, system prompt: {system_prompt}):\n{messages}",
        params.messages.len(),
        params.max_tokens,
    )
}

fn summarize_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() <= 48 {
        trimmed.to_string()
    } else {
        let mut truncated = trimmed.chars().take(48).collect::<String>();
        truncated.push('…');
        truncated
    }
}

async fn ask_approval(interaction: &dyn Interaction) -> bool {
    loop {
        match interaction.read_line("Allow this sampling request? (yes/no): ").await {
            UserInput::Line(answer) => match answer.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" => return true,
                "no" | "n" => return false,
                _ => interaction.warning("Please answer yes or no."),
            },
            UserInput::Interrupted | UserInput::Closed => return false,
        }
    }
}
