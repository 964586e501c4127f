//! Command-line entry point: argument parsing, start-up and shutdown.

pub mod repl;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::api::openai::OpenAiCompatibleProvider;
use crate::core::config::data::{path_display, HostSettings, McpConfig};
use crate::core::conversation::ConversationController;
use crate::core::history::History;
use crate::core::interaction::{Interaction, TerminalInteraction};
use crate::core::provider::CompletionProvider;
use crate::mcp::callbacks::CallbackBridge;
use crate::mcp::executor::{RetryPolicy, ToolExecutor};
use crate::mcp::manager::{ResourceIndex, SessionManager};
use crate::mcp::registry::ToolRegistry;
use crate::utils::logging;

#[derive(Parser, Debug)]
#[command(name = "mcphost")]
#[command(version)]
#[command(about = "Chat with a language model that can use tools from several MCP servers")]
#[command(
    long_about = "mcphost connects a chat model to every server listed under `mcpServers` in \
the config file. Tools from all servers are offered to the model as <server>__<tool>, and \
resource templates become callable tools as well.\n\n\
Providers (-m provider:model):\n\
  openai    OPENAI_API_KEY\n\
  deepseek  DEEPSEEK_API_KEY\n\
  ollama    no key, http://localhost:11434/v1\n\
  azure     AZURE_OPENAI_ENDPOINT, AZURE_OPENAI_API_KEY, AZURE_OPENAI_API_VERSION\n\n\
Type /help at the prompt for commands."
)]
pub struct Args {
    /// Server map (JSON with an `mcpServers` object). Defaults to ~/.mcp.json
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of history messages kept, not counting the system prompt
    #[arg(long, value_name = "N")]
    pub message_window: Option<usize>,

    /// Model as provider:model, e.g. openai:gpt-4o or ollama:llama3.2
    #[arg(short = 'm', long, value_name = "PROVIDER:MODEL")]
    pub model: Option<String>,

    /// Verbose logging and debug log level on servers that support it
    #[arg(long)]
    pub debug: bool,

    /// Override the provider base URL
    #[arg(long, value_name = "URL")]
    pub openai_url: Option<String>,

    /// System prompt pinned at the start of the conversation
    #[arg(long, value_name = "TEXT")]
    pub system_prompt: Option<String>,

    /// Workspace root offered to servers through roots/list (repeatable)
    #[arg(long = "root", value_name = "PATH")]
    pub roots: Vec<PathBuf>,
}

/// Settings after command-line flags are applied over `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub model: String,
    pub base_url: Option<String>,
    pub message_window: usize,
    pub system_prompt: Option<String>,
    pub roots: Vec<String>,
    pub retry_policy: RetryPolicy,
    pub max_tool_rounds: usize,
    pub max_tokens: Option<u32>,
    pub debug: bool,
}

impl RunOptions {
    pub fn resolve(
        args: Args,
        settings: HostSettings,
        default_config_path: Option<PathBuf>,
    ) -> Result<Self, Box<dyn Error>> {
        let config_path = args
            .config
            .or(default_config_path)
            .ok_or("Unable to locate a home directory; pass --config PATH")?;
        let model = args
            .model
            .or_else(|| settings.model.clone())
            .filter(|model| !model.trim().is_empty())
            .ok_or("No model selected; pass -m provider:model or set `model` in config.toml")?;
        let message_window = args.message_window.unwrap_or(settings.message_window);
        if message_window == 0 {
            return Err("--message-window must be at least 1".into());
        }
        let roots = if args.roots.is_empty() {
            settings.roots.clone()
        } else {
            args.roots
        };

        Ok(Self {
            config_path,
            model,
            base_url: args.openai_url.or_else(|| settings.base_url.clone()),
            message_window,
            system_prompt: args
                .system_prompt
                .or_else(|| settings.system_prompt.clone())
                .filter(|prompt| !prompt.trim().is_empty()),
            roots: roots
                .iter()
                .map(|root| root.to_string_lossy().into_owned())
                .collect(),
            retry_policy: settings.retry_policy(),
            max_tool_rounds: settings.max_tool_rounds,
            max_tokens: settings.max_tokens,
            debug: args.debug,
        })
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let settings = HostSettings::load_default()?;
    let options = RunOptions::resolve(args, settings, McpConfig::default_path())?;
    let config = McpConfig::load_from_path(&options.config_path)?;

    logging::init(options.debug);
    info!(
        config = %path_display(&options.config_path),
        servers = config.servers.len(),
        "Loaded MCP configuration"
    );

    let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiCompatibleProvider::from_model_spec(
        &options.model,
        options.base_url.as_deref(),
    )?);
    let interaction: Arc<dyn Interaction> = Arc::new(TerminalInteraction::new());
    let callbacks = Arc::new(CallbackBridge::new(
        provider.clone(),
        interaction.clone(),
        options.roots.clone(),
    ));

    let mut manager = SessionManager::from_config(&config)?;
    if let Err(err) = manager.initialize_all(options.debug, callbacks).await {
        error!(error = %err, "Failed to start MCP servers");
        return Err(err.into());
    }
    let sessions = Arc::new(manager);

    let result = run_session(&options, sessions.clone(), provider, interaction).await;
    sessions.cleanup_all().await;
    result
}

async fn run_session(
    options: &RunOptions,
    sessions: Arc<SessionManager>,
    provider: Arc<dyn CompletionProvider>,
    interaction: Arc<dyn Interaction>,
) -> Result<(), Box<dyn Error>> {
    let registry = ToolRegistry::build_from(&sessions).await?;
    let resources = ResourceIndex::build_from(&sessions).await?;

    interaction.info(&repl::greeting(&sessions, &registry, provider.as_ref()));

    let executor = ToolExecutor::new(sessions.clone(), options.retry_policy);
    let mut controller = ConversationController::new(
        provider,
        interaction.clone(),
        registry,
        executor,
        History::new(options.system_prompt.clone(), options.message_window),
    )
    .with_max_tool_rounds(options.max_tool_rounds)
    .with_max_tokens(options.max_tokens);

    repl::run(&mut controller, &sessions, &resources, interaction.as_ref()).await;
    Ok(())
}
