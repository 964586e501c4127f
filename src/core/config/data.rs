use crate::core::conversation::DEFAULT_MAX_TOOL_ROUNDS;
use crate::core::history::DEFAULT_MESSAGE_WINDOW;
use crate::mcp::executor::{RetryPolicy, DEFAULT_TOOL_RETRIES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One entry under `mcpServers`.
///
/// An entry with `command` is a local subprocess; an entry with `url` is a
/// remote streamable HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Merged over the inherited environment.
        #[serde(default)]
        env: Option<BTreeMap<String, String>>,
    },
    Remote {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl ServerConfig {
    pub fn transport_label(&self) -> &'static str {
        match self {
            ServerConfig::Local { .. } => "stdio",
            ServerConfig::Remote { .. } => "http",
        }
    }
}

/// Servers in file order, which is also initialization order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct McpConfig {
    pub servers: Vec<(String, ServerConfig)>,
}

impl McpConfig {
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, server)| server)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|(name, _)| name.as_str())
    }
}

fn default_message_window() -> usize {
    DEFAULT_MESSAGE_WINDOW
}

fn default_tool_retries() -> u32 {
    DEFAULT_TOOL_RETRIES
}

fn default_tool_retry_delay_ms() -> u64 {
    1000
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

/// Host settings from `config.toml`. Command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Default `provider:model`.
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_message_window")]
    pub message_window: usize,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// Total attempts per tool call.
    #[serde(default = "default_tool_retries")]
    pub tool_retries: u32,
    #[serde(default = "default_tool_retry_delay_ms")]
    pub tool_retry_delay_ms: u64,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    pub max_tokens: Option<u32>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            message_window: default_message_window(),
            system_prompt: None,
            roots: Vec::new(),
            tool_retries: default_tool_retries(),
            tool_retry_delay_ms: default_tool_retry_delay_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            max_tokens: None,
        }
    }
}

impl HostSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.tool_retries.max(1),
            delay: Duration::from_millis(self.tool_retry_delay_ms),
        }
    }
}

/// Shows paths under the home directory with `~`.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
