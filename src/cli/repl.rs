//! The interactive read-eval loop.

use crate::commands::{process_input, CommandContext, CommandResult};
use crate::core::conversation::ConversationController;
use crate::core::interaction::{Interaction, UserInput};
use crate::core::provider::CompletionProvider;
use crate::mcp::manager::{ResourceIndex, SessionManager};
use crate::mcp::registry::ToolRegistry;
use tracing::{debug, warn};

const PROMPT: &str = "> ";

pub fn greeting(
    sessions: &SessionManager,
    registry: &ToolRegistry,
    provider: &dyn CompletionProvider,
) -> String {
    let names: Vec<&str> = sessions.handles().iter().map(|h| h.name()).collect();
    let servers = if names.is_empty() {
        "no servers".to_string()
    } else {
        names.join(", ")
    };
    format!(
        "Connected to {servers} with {} tool(s) using {}:{}. Type /help for commands.",
        registry.all().len(),
        provider.name(),
        provider.model()
    )
}

/// Reads input until `/quit`, Ctrl-C or end of input.
///
/// Turn failures are reported and the loop keeps going.
pub async fn run(
    controller: &mut ConversationController,
    sessions: &SessionManager,
    resources: &ResourceIndex,
    interaction: &dyn Interaction,
) {
    loop {
        let line = match interaction.read_line(PROMPT).await {
            UserInput::Line(line) => line,
            UserInput::Interrupted => {
                debug!("Interrupted at prompt");
                break;
            }
            UserInput::Closed => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = {
            let mut ctx = CommandContext {
                sessions,
                resources,
                controller: &mut *controller,
                interaction,
            };
            process_input(&mut ctx, &line).await
        };

        let turn_input = match result {
            CommandResult::Continue => continue,
            CommandResult::Quit => break,
            CommandResult::ProcessAsMessage(text) => text,
            CommandResult::RunTurn => String::new(),
        };
        if let Err(err) = controller.run_turn(&turn_input).await {
            warn!(error = %err, "Turn failed");
            interaction.warning(&err.to_string());
        }
    }
}
