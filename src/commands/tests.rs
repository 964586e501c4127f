use super::*;
use crate::core::conversation::TurnOutcome;
use crate::core::history::History;
use crate::core::provider::Completion;
use crate::mcp::executor::{RetryPolicy, ToolExecutor};
use crate::mcp::registry::ToolRegistry;
use crate::mcp::session::{Capabilities, PromptArgumentInfo, PromptInfo};
use crate::mcp::testing::{
    RecordingCallbacks, ScriptedInteraction, ScriptedProvider, ScriptedSession,
};
use std::sync::Arc;

struct Fixture {
    sessions: Arc<SessionManager>,
    resources: ResourceIndex,
    controller: ConversationController,
    interaction: Arc<ScriptedInteraction>,
    provider: Arc<ScriptedProvider>,
    fs: ScriptedSession,
}

impl Fixture {
    async fn run(&mut self, input: &str) -> CommandResult {
        let mut ctx = CommandContext {
            sessions: &self.sessions,
            resources: &self.resources,
            controller: &mut self.controller,
            interaction: self.interaction.as_ref(),
        };
        process_input(&mut ctx, input).await
    }

    fn last_info(&self) -> String {
        self.interaction.infos().last().cloned().unwrap_or_default()
    }

    fn last_warning(&self) -> String {
        self.interaction.warnings().last().cloned().unwrap_or_default()
    }
}

fn all_caps() -> Capabilities {
    Capabilities {
        tools: true,
        resources: true,
        prompts: true,
        logging: false,
    }
}

fn summarize_prompt() -> PromptInfo {
    PromptInfo {
        name: "summarize".to_string(),
        description: Some("Summarize a topic".to_string()),
        arguments: vec![
            PromptArgumentInfo {
                name: "topic".to_string(),
                description: None,
                required: Some(true),
            },
            PromptArgumentInfo {
                name: "tone".to_string(),
                description: None,
                required: Some(false),
            },
        ],
    }
}

async fn fixture(inputs: &[&str], replies: Vec<Completion>) -> Fixture {
    let fs = ScriptedSession::new()
        .with_capabilities(all_caps())
        .with_tools(&["read_file", "write_file"])
        .with_templates(&["file:///{path}"])
        .with_resource("file:///notes.txt", "fs notes")
        .with_resource("file:///shared.txt", "fs shared")
        .with_prompt(summarize_prompt());
    let web = ScriptedSession::new()
        .with_capabilities(all_caps())
        .with_tools(&["fetch"])
        .with_resource("file:///shared.txt", "web shared");

    let mut manager = SessionManager::new();
    manager.add("fs", Arc::new(fs.clone()));
    manager.add("web", Arc::new(web));
    manager
        .initialize_all(false, Arc::new(RecordingCallbacks::default()))
        .await
        .expect("initialize");
    let sessions = Arc::new(manager);

    let registry = ToolRegistry::build_from(&sessions).await.expect("registry");
    let resources = ResourceIndex::build_from(&sessions).await.expect("resources");
    let provider = Arc::new(ScriptedProvider::new(
        replies.into_iter().map(|reply| Ok(Some(reply))).collect(),
    ));
    let interaction = Arc::new(ScriptedInteraction::lines(inputs.iter().copied()));
    let controller = ConversationController::new(
        provider.clone(),
        interaction.clone(),
        registry,
        ToolExecutor::new(sessions.clone(), RetryPolicy::default()),
        History::new(Some("be brief".to_string()), 10),
    );

    Fixture {
        sessions,
        resources,
        controller,
        interaction,
        provider,
        fs,
    }
}

#[tokio::test]
async fn plain_text_is_sent_to_the_model() {
    let mut fx = fixture(&[], Vec::new()).await;
    assert_eq!(
        fx.run("hello there").await,
        CommandResult::ProcessAsMessage("hello there".to_string())
    );
}

#[tokio::test]
async fn quit_forms_end_the_loop() {
    let mut fx = fixture(&[], Vec::new()).await;
    for input in ["/quit", "quit", "EXIT", "  exit  "] {
        assert_eq!(fx.run(input).await, CommandResult::Quit, "input {input}");
    }
}

#[tokio::test]
async fn unknown_commands_suggest_close_matches() {
    let mut fx = fixture(&[], Vec::new()).await;
    assert_eq!(fx.run("/res").await, CommandResult::Continue);
    assert_eq!(
        fx.last_warning(),
        "Unknown command /res. Did you mean /resources, /resource?"
    );

    fx.run("/frobnicate").await;
    assert!(fx.last_warning().ends_with("Try /help."));
}

#[tokio::test]
async fn help_lists_every_command() {
    let mut fx = fixture(&[], Vec::new()).await;
    fx.run("/help").await;
    let help = fx.last_info();
    for command in all_commands() {
        assert!(help.contains(command.usage), "missing {}", command.usage);
    }
}

#[tokio::test]
async fn tools_are_grouped_by_server_with_exclusions() {
    let mut fx = fixture(&[], Vec::new()).await;
    fx.run("/exclude __write_file").await;
    assert_eq!(fx.last_info(), "Excluded: fs__write_file");

    fx.run("/tools").await;
    let listing = fx.last_info();
    assert!(listing.starts_with("fs:\n  fs__read_file - read_file tool"));
    assert!(listing.contains("fs__resource_template_0"));
    assert!(listing.contains("web:\n  web__fetch - fetch tool"));
    assert!(!listing.contains("  fs__write_file"));
    assert!(listing.ends_with("Excluded: fs__write_file"));
}

#[tokio::test]
async fn exclude_reports_when_nothing_matches() {
    let mut fx = fixture(&[], Vec::new()).await;
    fx.run("/exclude nothing_here").await;
    assert_eq!(fx.last_info(), "No active tools end with 'nothing_here'.");

    fx.run("/exclude").await;
    assert_eq!(fx.last_warning(), "Usage: /exclude <suffix>");
}

#[tokio::test]
async fn servers_show_transport_state_and_capabilities() {
    let mut fx = fixture(&[], Vec::new()).await;
    fx.run("/servers").await;
    assert_eq!(
        fx.last_info(),
        "fs [scripted] ready - tools, resources, prompts\nweb [scripted] ready - tools, resources, prompts"
    );
}

#[tokio::test]
async fn resources_mark_shared_uris() {
    let mut fx = fixture(&[], Vec::new()).await;
    fx.run("/resources").await;
    let listing = fx.last_info();
    assert!(listing.contains("fs: file:///notes.txt - notes.txt"));
    assert!(listing.contains("web: file:///shared.txt - shared.txt (shared: fs, web)"));
}

#[tokio::test]
async fn resource_fetch_handles_ambiguity() {
    let mut fx = fixture(&[], Vec::new()).await;

    fx.run("/resource file:///notes.txt").await;
    assert_eq!(fx.last_info(), "fs file:///notes.txt:\nfs notes");

    fx.run("/resource file:///shared.txt").await;
    assert!(fx.last_warning().contains("several servers (fs, web)"));

    fx.run("/resource web__file:///shared.txt").await;
    assert_eq!(fx.last_info(), "web file:///shared.txt:\nweb shared");

    fx.run("/resource file:///missing.txt").await;
    assert!(fx.last_warning().contains("no server offers"));
}

#[tokio::test]
async fn prompts_show_arguments() {
    let mut fx = fixture(&[], Vec::new()).await;
    fx.run("/prompts").await;
    assert_eq!(
        fx.last_info(),
        "fs__summarize topic [tone] - Summarize a topic"
    );
}

#[tokio::test]
async fn prompt_collects_arguments_and_runs_a_turn() {
    let mut fx = fixture(&["", "soil", ""], vec![Completion::text("Soil is alive.")]).await;

    assert_eq!(fx.run("/prompt fs__summarize").await, CommandResult::RunTurn);
    assert_eq!(fx.last_warning(), "'topic' is required.");

    let requests = fx.fs.prompt_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "summarize");
    assert_eq!(requests[0].1.get("topic").map(String::as_str), Some("soil"));
    assert!(!requests[0].1.contains_key("tone"));

    let messages = fx.controller.history().messages();
    assert_eq!(
        messages.last(),
        Some(&ConversationMessage::user("summarize(topic=soil)"))
    );

    let outcome = fx.controller.run_turn("").await.expect("turn");
    assert_eq!(outcome, TurnOutcome::Replied("Soil is alive.".to_string()));
    assert_eq!(fx.provider.requests().len(), 1);
}

#[tokio::test]
async fn prompt_accepts_inline_arguments() {
    let mut fx = fixture(&[], Vec::new()).await;
    assert_eq!(
        fx.run("/prompt fs__summarize topic=\"clay soil\" tone=dry").await,
        CommandResult::RunTurn
    );
    let requests = fx.fs.prompt_requests();
    assert_eq!(requests[0].1.get("topic").map(String::as_str), Some("clay soil"));
    assert_eq!(requests[0].1.get("tone").map(String::as_str), Some("dry"));
}

#[tokio::test]
async fn prompt_errors_leave_history_alone() {
    let mut fx = fixture(&[], Vec::new()).await;
    let before = fx.controller.history().len();

    fx.run("/prompt summarize").await;
    assert!(fx.last_warning().starts_with("Usage: /prompt"));

    fx.run("/prompt fs__missing").await;
    assert_eq!(fx.last_warning(), "No prompt 'missing' on server 'fs'.");

    fx.run("/prompt nope__summarize").await;
    assert_eq!(fx.last_warning(), "Server 'nope' is not connected.");

    fx.run("/prompt fs__summarize mood=odd").await;
    assert_eq!(
        fx.last_warning(),
        "Unknown prompt argument 'mood'. Allowed: tone, topic."
    );

    assert_eq!(fx.controller.history().len(), before);
    assert!(fx.fs.prompt_requests().is_empty());
}

#[tokio::test]
async fn closed_input_cancels_prompt_collection() {
    let mut fx = fixture(&[], Vec::new()).await;
    assert_eq!(fx.run("/prompt fs__summarize").await, CommandResult::Continue);
    assert_eq!(fx.last_info(), "Prompt cancelled.");
    assert!(fx.fs.prompt_requests().is_empty());
}

#[tokio::test]
async fn history_lists_messages_in_order() {
    let mut fx = fixture(&[], vec![Completion::text("hi!")]).await;
    fx.controller.run_turn("hello").await.expect("turn");

    fx.run("/history").await;
    assert_eq!(
        fx.last_info(),
        "[0] system: be brief\n[1] user: hello\n[2] assistant: hi!"
    );
}
