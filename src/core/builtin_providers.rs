//! Built-in provider presets
//!
//! The table is embedded from `builtin_providers.toml` at build time.

use serde::Deserialize;

const CONFIG_CONTENT: &str = include_str!("../builtin_providers.toml");
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Environment variable that overrides `base_url` when set.
    #[serde(default)]
    pub base_url_env: Option<String>,
    /// Environment variable holding the API key. Keyless when absent.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

impl BuiltinProvider {
    /// Wire dialect: `openai` (bearer token) or `azure` (deployment URL, `api-key` header).
    pub fn auth_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("openai")
    }

    pub fn is_azure_mode(&self) -> bool {
        self.auth_mode() == "azure"
    }
}

pub fn load_builtin_providers() -> Result<Vec<BuiltinProvider>, toml::de::Error> {
    let config: BuiltinProvidersConfig = toml::from_str(CONFIG_CONTENT)?;
    Ok(config.providers)
}

/// Find a built-in provider by ID (case-insensitive)
pub fn find_builtin_provider(id: &str) -> Option<BuiltinProvider> {
    load_builtin_providers()
        .ok()?
        .into_iter()
        .find(|provider| provider.id.eq_ignore_ascii_case(id))
}
