use crate::core::config::data::{path_display, HostSettings, McpConfig, ServerConfig};
use crate::mcp::registry::NAME_SEPARATOR;
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

type ParseSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while loading configuration. All of them abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {}: {source}", path_display(.path))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", path_display(.path))]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseSource,
    },

    #[error("No servers configured under `mcpServers` in {}", path_display(.path))]
    MissingServers { path: PathBuf },

    #[error("Server '{server}': command '{command}' was not found")]
    UnresolvedCommand { server: String, command: String },

    #[error(
        "Invalid server name '{name}': names must be non-empty and must not contain '{}'",
        NAME_SEPARATOR
    )]
    InvalidServerName { name: String },

    #[error("Server '{server}' has an empty url")]
    EmptyUrl { server: String },
}

#[derive(Deserialize)]
struct McpFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: Map<String, Value>,
}

impl McpConfig {
    /// Reads an `mcpServers` JSON file, keeping server order, and validates it.
    ///
    /// Local commands are resolved against `PATH` here so a missing binary
    /// fails before any server is started.
    pub fn load_from_path(path: &Path) -> Result<McpConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(path, &contents)?;
        config.resolve_commands(std::env::var_os("PATH").as_deref())
    }

    pub(crate) fn parse(path: &Path, contents: &str) -> Result<McpConfig, ConfigError> {
        let parse_error = |source: serde_json::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        };
        let file: McpFile = serde_json::from_str(contents).map_err(parse_error)?;
        if file.mcp_servers.is_empty() {
            return Err(ConfigError::MissingServers {
                path: path.to_path_buf(),
            });
        }

        let mut servers = Vec::with_capacity(file.mcp_servers.len());
        for (name, entry) in file.mcp_servers {
            validate_server_name(&name)?;
            let server: ServerConfig = serde_json::from_value(entry).map_err(parse_error)?;
            if let ServerConfig::Remote { url, .. } = &server {
                if url.trim().is_empty() {
                    return Err(ConfigError::EmptyUrl { server: name });
                }
            }
            servers.push((name, server));
        }
        Ok(McpConfig { servers })
    }

    pub(crate) fn resolve_commands(self, path_var: Option<&OsStr>) -> Result<McpConfig, ConfigError> {
        let mut servers = Vec::with_capacity(self.servers.len());
        for (name, server) in self.servers {
            let server = match server {
                ServerConfig::Local { command, args, env } => {
                    let resolved = resolve_command(&command, path_var).ok_or_else(|| {
                        ConfigError::UnresolvedCommand {
                            server: name.clone(),
                            command: command.clone(),
                        }
                    })?;
                    debug!(server = %name, command = %resolved.display(), "Resolved server command");
                    ServerConfig::Local {
                        command: resolved.to_string_lossy().into_owned(),
                        args,
                        env,
                    }
                }
                remote => remote,
            };
            servers.push((name, server));
        }
        Ok(McpConfig { servers })
    }

    /// `$HOME/.mcp.json`.
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.home_dir().join(".mcp.json"))
    }
}

pub fn validate_server_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() || name.contains(NAME_SEPARATOR) {
        return Err(ConfigError::InvalidServerName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Finds `command` on disk. Bare names are searched for in `path_var`;
/// anything with a path component is checked as given.
pub fn resolve_command(command: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if command.is_empty() {
        return None;
    }
    if candidate.is_absolute() || candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    std::env::split_paths(path_var?)
        .flat_map(|dir| executable_names(command).map(move |name| dir.join(name)))
        .find(|path| is_executable(path))
}

#[cfg(windows)]
fn executable_names(command: &str) -> impl Iterator<Item = String> + '_ {
    ["", ".exe", ".cmd", ".bat"]
        .into_iter()
        .map(move |ext| format!("{command}{ext}"))
}

#[cfg(not(windows))]
fn executable_names(command: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(command.to_string())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl HostSettings {
    /// Missing files yield the defaults.
    pub fn load_from_path(path: &Path) -> Result<HostSettings, ConfigError> {
        if !path.exists() {
            return Ok(HostSettings::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mcphost").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load_default() -> Result<HostSettings, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(HostSettings::default()),
        }
    }
}
