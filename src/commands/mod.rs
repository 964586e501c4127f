mod prompt_args;
mod registry;

pub use registry::{all_commands, find_command, matching_commands, CommandInvocation, CommandKind};

use crate::core::conversation::ConversationController;
use crate::core::interaction::Interaction;
use crate::core::message::ConversationMessage;
use crate::mcp::manager::{ResourceIndex, SessionManager};
use crate::mcp::registry::split_qualified;
use crate::mcp::session::{ContentItem, PromptMessage};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Continue,
    ProcessAsMessage(String),
    /// History was extended; run a completion turn without new user input.
    RunTurn,
    Quit,
}

/// Everything a command may read or change.
pub struct CommandContext<'a> {
    pub sessions: &'a SessionManager,
    pub resources: &'a ResourceIndex,
    pub controller: &'a mut ConversationController,
    pub interaction: &'a dyn Interaction,
}

pub async fn process_input(ctx: &mut CommandContext<'_>, input: &str) -> CommandResult {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
        return CommandResult::Quit;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return CommandResult::ProcessAsMessage(input.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command_name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => return CommandResult::ProcessAsMessage(input.to_string()),
    };
    let args = parts.next().unwrap_or("").trim();

    let Some(command) = find_command(command_name) else {
        let suggestions: Vec<String> = matching_commands(command_name)
            .iter()
            .map(|command| format!("/{}", command.name))
            .collect();
        let hint = if suggestions.is_empty() {
            "Try /help.".to_string()
        } else {
            format!("Did you mean {}?", suggestions.join(", "))
        };
        ctx.interaction
            .warning(&format!("Unknown command /{command_name}. {hint}"));
        return CommandResult::Continue;
    };
    let invocation = CommandInvocation {
        input: trimmed,
        args,
    };

    match command.kind {
        CommandKind::Help => handle_help(ctx),
        CommandKind::Tools => handle_tools(ctx),
        CommandKind::Servers => handle_servers(ctx),
        CommandKind::History => handle_history(ctx),
        CommandKind::Exclude => handle_exclude(ctx, invocation),
        CommandKind::Resources => handle_resources(ctx).await,
        CommandKind::Resource => handle_resource(ctx, invocation).await,
        CommandKind::Prompts => handle_prompts(ctx).await,
        CommandKind::Prompt => handle_prompt(ctx, invocation).await,
        CommandKind::Quit => CommandResult::Quit,
    }
}

fn handle_help(ctx: &mut CommandContext<'_>) -> CommandResult {
    let width = all_commands()
        .iter()
        .map(|command| command.usage.len())
        .max()
        .unwrap_or(0);
    let mut output = String::from("Commands:\n");
    for command in all_commands() {
        output.push_str(&format!("  {:width$}  {}\n", command.usage, command.help));
    }
    output.push_str("Anything else is sent to the model.");
    ctx.interaction.info(&output);
    CommandResult::Continue
}

fn handle_tools(ctx: &mut CommandContext<'_>) -> CommandResult {
    let registry = ctx.controller.registry();
    let mut by_server: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for tool in registry.active() {
        let line = if tool.description.is_empty() {
            format!("  {}", tool.qualified_name())
        } else {
            format!("  {} - {}", tool.qualified_name(), tool.description)
        };
        by_server.entry(tool.session.as_str()).or_default().push(line);
    }

    let mut output = String::new();
    if by_server.is_empty() {
        output.push_str("No active tools.");
    }
    for (server, lines) in by_server {
        output.push_str(&format!("{server}:\n{}\n", lines.join("\n")));
    }
    if !registry.excluded().is_empty() {
        let excluded: Vec<&str> = registry.excluded().iter().collect();
        output.push_str(&format!("Excluded: {}", excluded.join(", ")));
    }
    ctx.interaction.info(output.trim_end());
    CommandResult::Continue
}

fn handle_servers(ctx: &mut CommandContext<'_>) -> CommandResult {
    if ctx.sessions.is_empty() {
        ctx.interaction.info("No servers configured.");
        return CommandResult::Continue;
    }
    let lines: Vec<String> = ctx
        .sessions
        .handles()
        .iter()
        .map(|handle| {
            format!(
                "{} [{}] {} - {}",
                handle.name(),
                handle.transport_label(),
                handle.state(),
                handle.capabilities().summary()
            )
        })
        .collect();
    ctx.interaction.info(&lines.join("\n"));
    CommandResult::Continue
}

fn handle_history(ctx: &mut CommandContext<'_>) -> CommandResult {
    let messages = ctx.controller.history().messages();
    if messages.is_empty() {
        ctx.interaction.info("History is empty.");
        return CommandResult::Continue;
    }
    let lines: Vec<String> = messages
        .iter()
        .enumerate()
        .map(|(index, message)| format!("[{index}] {}: {}", message.role(), message.summary()))
        .collect();
    ctx.interaction.info(&lines.join("\n"));
    CommandResult::Continue
}

fn handle_exclude(ctx: &mut CommandContext<'_>, invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        ctx.interaction.warning("Usage: /exclude <suffix>");
        return CommandResult::Continue;
    }
    let removed = ctx.controller.registry_mut().exclude(invocation.args);
    if removed.is_empty() {
        ctx.interaction
            .info(&format!("No active tools end with '{}'.", invocation.args));
    } else {
        ctx.interaction
            .info(&format!("Excluded: {}", removed.join(", ")));
    }
    CommandResult::Continue
}

async fn handle_resources(ctx: &mut CommandContext<'_>) -> CommandResult {
    match ctx.sessions.list_resources().await {
        Ok(resources) if resources.is_empty() => ctx.interaction.info("No resources available."),
        Ok(resources) => {
            let lines: Vec<String> = resources
                .iter()
                .map(|entry| {
                    let servers = ctx.resources.sessions_for(&entry.item.uri);
                    let owners = if servers.len() > 1 {
                        format!(" (shared: {})", servers.join(", "))
                    } else {
                        String::new()
                    };
                    let name = if entry.item.name.is_empty() {
                        String::new()
                    } else {
                        format!(" - {}", entry.item.name)
                    };
                    format!("{}: {}{name}{owners}", entry.session, entry.item.uri)
                })
                .collect();
            ctx.interaction.info(&lines.join("\n"));
        }
        Err(err) => ctx.interaction.warning(&err.to_string()),
    }
    CommandResult::Continue
}

async fn handle_resource(
    ctx: &mut CommandContext<'_>,
    invocation: CommandInvocation<'_>,
) -> CommandResult {
    if invocation.args.is_empty() {
        ctx.interaction.warning("Usage: /resource <uri | server__uri>");
        return CommandResult::Continue;
    }
    let (server, uri) = match ctx.resources.resolve(invocation.args) {
        Ok(target) => target,
        Err(err) => {
            ctx.interaction.warning(&err.to_string());
            return CommandResult::Continue;
        }
    };
    let Some(handle) = ctx.sessions.get(&server) else {
        ctx.interaction
            .warning(&format!("Server '{server}' is not connected."));
        return CommandResult::Continue;
    };
    match handle.read_resource(&uri).await {
        Ok(contents) => {
            let text: Vec<String> = contents.iter().map(|c| c.as_display_text()).collect();
            ctx.interaction
                .info(&format!("{server} {uri}:\n{}", text.join("\n")));
        }
        Err(err) => ctx
            .interaction
            .warning(&format!("Failed to read {uri} from {server}: {err}")),
    }
    CommandResult::Continue
}

async fn handle_prompts(ctx: &mut CommandContext<'_>) -> CommandResult {
    match ctx.sessions.list_prompts().await {
        Ok(prompts) if prompts.is_empty() => ctx.interaction.info("No prompts available."),
        Ok(prompts) => {
            let lines: Vec<String> = prompts
                .iter()
                .map(|entry| {
                    let arguments: Vec<String> = entry
                        .item
                        .arguments
                        .iter()
                        .map(|arg| {
                            if arg.is_required() {
                                arg.name.clone()
                            } else {
                                format!("[{}]", arg.name)
                            }
                        })
                        .collect();
                    let mut line = entry.qualified_name();
                    if !arguments.is_empty() {
                        line.push_str(&format!(" {}", arguments.join(" ")));
                    }
                    if let Some(description) = entry.item.description.as_deref() {
                        line.push_str(&format!(" - {description}"));
                    }
                    line
                })
                .collect();
            ctx.interaction.info(&lines.join("\n"));
        }
        Err(err) => ctx.interaction.warning(&err.to_string()),
    }
    CommandResult::Continue
}

async fn handle_prompt(
    ctx: &mut CommandContext<'_>,
    invocation: CommandInvocation<'_>,
) -> CommandResult {
    let mut parts = invocation.args.splitn(2, char::is_whitespace);
    let target = parts.next().unwrap_or_default();
    let inline = parts.next().unwrap_or_default();
    let (server, prompt_name) = match split_qualified(target) {
        Ok(pair) => pair,
        Err(_) => {
            ctx.interaction
                .warning("Usage: /prompt <server__name> [key=value ...]");
            return CommandResult::Continue;
        }
    };

    let Some(handle) = ctx.sessions.get(server) else {
        ctx.interaction
            .warning(&format!("Server '{server}' is not connected."));
        return CommandResult::Continue;
    };
    let prompts = match handle.list_prompts().await {
        Ok(prompts) => prompts,
        Err(err) => {
            ctx.interaction.warning(&err.to_string());
            return CommandResult::Continue;
        }
    };
    let Some(prompt) = prompts.iter().find(|prompt| prompt.name == prompt_name) else {
        ctx.interaction
            .warning(&format!("No prompt '{prompt_name}' on server '{server}'."));
        return CommandResult::Continue;
    };

    let provided = match prompt_args::parse_inline_arguments(inline, &prompt.arguments)
        .and_then(|provided| {
            prompt_args::check_known_arguments(&provided, &prompt.arguments).map(|_| provided)
        }) {
        Ok(provided) => provided,
        Err(err) => {
            ctx.interaction.warning(&err);
            return CommandResult::Continue;
        }
    };
    let Some(arguments) =
        prompt_args::collect_missing_arguments(ctx.interaction, &prompt.arguments, provided).await
    else {
        ctx.interaction.info("Prompt cancelled.");
        return CommandResult::Continue;
    };

    let result = match handle.get_prompt(prompt_name, arguments).await {
        Ok(result) => result,
        Err(err) => {
            ctx.interaction.warning(&format!(
                "Failed to get prompt {target}: {err}"
            ));
            return CommandResult::Continue;
        }
    };

    let messages: Vec<ConversationMessage> =
        result.messages.iter().filter_map(prompt_message).collect();
    if messages.is_empty() {
        ctx.interaction
            .warning(&format!("Prompt {target} returned no usable messages."));
        return CommandResult::Continue;
    }
    for message in messages {
        ctx.controller.push_message(message);
    }
    CommandResult::RunTurn
}

/// Prompt messages become user or assistant turns; other roles are dropped.
fn prompt_message(message: &PromptMessage) -> Option<ConversationMessage> {
    let text = match &message.content {
        ContentItem::Text { text } => text.clone(),
        other => other.as_display_text(),
    };
    match message.role.as_str() {
        "user" => Some(ConversationMessage::user(text)),
        "assistant" => Some(ConversationMessage::assistant_text(text)),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
