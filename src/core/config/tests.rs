use super::data::{HostSettings, McpConfig, ServerConfig};
use super::io::{resolve_command, validate_server_name, ConfigError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

#[cfg(unix)]
fn make_executable(dir: &Path, name: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\n").expect("write script");
    let mut permissions = fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("chmod");
    path
}

#[test]
fn servers_keep_file_order_and_variants() {
    let config = McpConfig::parse(
        Path::new("mcp.json"),
        r#"{
            "mcpServers": {
                "zeta": { "command": "zeta-server", "args": ["--stdio"], "env": { "LEVEL": "2" } },
                "alpha": { "url": "https://mcp.example.com/mcp", "headers": { "X-Team": "infra" } },
                "mid": { "command": "mid-server" }
            }
        }"#,
    )
    .expect("config parses");

    let names: Vec<&str> = config.names().collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);

    let mut env = BTreeMap::new();
    env.insert("LEVEL".to_string(), "2".to_string());
    assert_eq!(
        config.server("zeta"),
        Some(&ServerConfig::Local {
            command: "zeta-server".to_string(),
            args: vec!["--stdio".to_string()],
            env: Some(env),
        })
    );
    assert_eq!(
        config.server("mid"),
        Some(&ServerConfig::Local {
            command: "mid-server".to_string(),
            args: Vec::new(),
            env: None,
        })
    );
    let alpha = config.server("alpha").expect("alpha");
    assert_eq!(alpha.transport_label(), "http");
    assert!(matches!(alpha, ServerConfig::Remote { headers, .. } if headers["X-Team"] == "infra"));
}

#[test]
fn missing_or_empty_server_map_is_rejected() {
    for contents in [r#"{}"#, r#"{"mcpServers": {}}"#] {
        let err = McpConfig::parse(Path::new("mcp.json"), contents).expect_err("no servers");
        assert!(matches!(err, ConfigError::MissingServers { .. }));
    }
}

#[test]
fn malformed_json_reports_the_path() {
    let err = McpConfig::parse(Path::new("/tmp/broken.json"), "{ not json").expect_err("bad json");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn entry_without_command_or_url_is_a_parse_error() {
    let err = McpConfig::parse(
        Path::new("mcp.json"),
        r#"{"mcpServers": {"odd": {"args": ["x"]}}}"#,
    )
    .expect_err("neither variant");
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn server_names_cannot_contain_the_separator() {
    assert!(validate_server_name("files").is_ok());
    assert!(validate_server_name("my_files").is_ok());
    for bad in ["", "  ", "my__files"] {
        assert!(matches!(
            validate_server_name(bad),
            Err(ConfigError::InvalidServerName { .. })
        ));
    }

    let err = McpConfig::parse(
        Path::new("mcp.json"),
        r#"{"mcpServers": {"a__b": {"command": "x"}}}"#,
    )
    .expect_err("separator in name");
    assert!(matches!(err, ConfigError::InvalidServerName { name } if name == "a__b"));
}

#[test]
fn remote_url_must_not_be_empty() {
    let err = McpConfig::parse(
        Path::new("mcp.json"),
        r#"{"mcpServers": {"web": {"url": "  "}}}"#,
    )
    .expect_err("empty url");
    assert!(matches!(err, ConfigError::EmptyUrl { server } if server == "web"));
}

#[cfg(unix)]
#[test]
fn bare_commands_resolve_against_path() {
    let bin = TempDir::new().expect("temp dir");
    let other = TempDir::new().expect("temp dir");
    let script = make_executable(bin.path(), "files-server");
    let path_var = std::env::join_paths([other.path(), bin.path()]).expect("join paths");

    assert_eq!(
        resolve_command("files-server", Some(path_var.as_os_str())),
        Some(script.clone())
    );
    assert_eq!(
        resolve_command(script.to_str().expect("utf-8 path"), None),
        Some(script)
    );
    assert_eq!(resolve_command("missing-server", Some(path_var.as_os_str())), None);
    assert_eq!(resolve_command("files-server", None), None);
}

#[cfg(unix)]
#[test]
fn non_executable_files_are_not_commands() {
    let bin = TempDir::new().expect("temp dir");
    fs::write(bin.path().join("notes"), "text").expect("write");
    let path_var = bin.path().as_os_str().to_os_string();
    assert_eq!(resolve_command("notes", Some(path_var.as_os_str())), None);
}

#[cfg(unix)]
#[test]
fn unresolved_command_names_the_server() {
    let bin = TempDir::new().expect("temp dir");
    let script = make_executable(bin.path(), "good-server");
    let config = McpConfig::parse(
        Path::new("mcp.json"),
        r#"{"mcpServers": {
            "good": {"command": "good-server"},
            "web": {"url": "http://localhost:9000/mcp"}
        }}"#,
    )
    .expect("parses");
    let path_var = bin.path().as_os_str().to_os_string();
    let resolved = config
        .clone()
        .resolve_commands(Some(path_var.as_os_str()))
        .expect("resolves");
    assert!(matches!(
        resolved.server("good"),
        Some(ServerConfig::Local { command, .. }) if Path::new(command) == script
    ));
    assert!(matches!(resolved.server("web"), Some(ServerConfig::Remote { .. })));

    let empty = TempDir::new().expect("temp dir");
    let err = config
        .resolve_commands(Some(empty.path().as_os_str()))
        .expect_err("missing binary");
    assert!(matches!(
        err,
        ConfigError::UnresolvedCommand { server, command } if server == "good" && command == "good-server"
    ));
}

#[test]
fn load_from_path_reports_missing_file() {
    let dir = TempDir::new().expect("temp dir");
    let err = McpConfig::load_from_path(&dir.path().join("absent.json")).expect_err("no file");
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn load_from_path_accepts_remote_only_config() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(
        &dir,
        "mcp.json",
        r#"{"mcpServers": {"web": {"url": "http://localhost:9000/mcp"}}}"#,
    );
    let config = McpConfig::load_from_path(&path).expect("loads");
    assert_eq!(config.servers.len(), 1);
}

#[test]
fn host_settings_default_when_file_is_absent() {
    let dir = TempDir::new().expect("temp dir");
    let settings =
        HostSettings::load_from_path(&dir.path().join("config.toml")).expect("defaults");
    assert_eq!(settings, HostSettings::default());
    assert_eq!(settings.message_window, 10);
    assert_eq!(settings.tool_retries, 2);
    assert_eq!(settings.max_tool_rounds, 10);
    assert_eq!(settings.retry_policy().delay, Duration::from_secs(1));
}

#[test]
fn host_settings_read_partial_toml() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(
        &dir,
        "config.toml",
        r#"
model = "ollama:llama3.2"
message_window = 4
roots = ["/srv/project"]
tool_retry_delay_ms = 250
"#,
    );
    let settings = HostSettings::load_from_path(&path).expect("loads");
    assert_eq!(settings.model.as_deref(), Some("ollama:llama3.2"));
    assert_eq!(settings.message_window, 4);
    assert_eq!(settings.roots, vec![PathBuf::from("/srv/project")]);
    assert_eq!(settings.tool_retries, 2);
    assert_eq!(settings.retry_policy().delay, Duration::from_millis(250));
}

#[test]
fn zero_retries_still_attempts_once() {
    let settings = HostSettings {
        tool_retries: 0,
        ..HostSettings::default()
    };
    assert_eq!(settings.retry_policy().retries, 1);
}

#[test]
fn invalid_toml_is_a_parse_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "config.toml", "message_window = \"many\"");
    let err = HostSettings::load_from_path(&path).expect_err("bad type");
    assert!(matches!(err, ConfigError::Parse { .. }));
}
