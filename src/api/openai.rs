//! Chat-completions client for OpenAI-compatible endpoints.

use super::{
    chat_messages, extract_error_summary, parse_completion, tool_definitions,
    ChatCompletionResponse, ChatRequest,
};
use crate::core::builtin_providers::{find_builtin_provider, DEFAULT_AZURE_API_VERSION};
use crate::core::provider::{Completion, CompletionProvider, CompletionRequest, ProviderError};
use crate::utils::url::{construct_api_url, normalize_base_url};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);
const AZURE_API_VERSION_ENV: &str = "AZURE_OPENAI_API_VERSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Bearer(String),
    /// Azure-style `api-key` header.
    ApiKey(String),
}

/// Where and how a `provider:model` pair is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub provider: String,
    pub model: String,
    pub url: String,
    pub auth: Auth,
}

/// Resolves `provider:model` against the built-in presets.
///
/// The base URL comes from `base_url_override`, then the preset's
/// `base_url_env`, then the preset default. `env` looks up environment
/// variables so resolution can be tested without touching the process.
pub fn resolve_endpoint(
    model_spec: &str,
    base_url_override: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ProviderEndpoint, ProviderError> {
    let (provider_id, model) = model_spec
        .split_once(':')
        .filter(|(provider, model)| !provider.is_empty() && !model.is_empty())
        .ok_or_else(|| ProviderError::UnknownProvider(model_spec.to_string()))?;
    let provider = find_builtin_provider(provider_id)
        .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))?;

    let base_url = base_url_override
        .map(str::to_string)
        .or_else(|| provider.base_url_env.as_deref().and_then(|name| env(name)))
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| provider.base_url.clone());

    let api_key = match provider.api_key_env.as_deref() {
        Some(name) => Some(
            env(name)
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| ProviderError::MissingCredentials(name.to_string()))?,
        ),
        None => None,
    };

    let (url, auth) = if provider.is_azure_mode() {
        let version = env(AZURE_API_VERSION_ENV)
            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
        let url = format!(
            "{}/openai/deployments/{model}/chat/completions?api-version={version}",
            normalize_base_url(&base_url)
        );
        (url, api_key.map(Auth::ApiKey).unwrap_or(Auth::None))
    } else {
        (
            construct_api_url(&base_url, "chat/completions"),
            api_key.map(Auth::Bearer).unwrap_or(Auth::None),
        )
    };

    Ok(ProviderEndpoint {
        provider: provider.id,
        model: model.to_string(),
        url,
        auth,
    })
}

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    endpoint: ProviderEndpoint,
}

impl OpenAiCompatibleProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        Ok(Self { client, endpoint })
    }

    /// Builds a provider from `provider:model`, reading keys from the environment.
    pub fn from_model_spec(
        model_spec: &str,
        base_url_override: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let endpoint = resolve_endpoint(model_spec, base_url_override, |name| {
            std::env::var(name).ok()
        })?;
        Self::new(endpoint)
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.endpoint.provider
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<Option<Completion>, ProviderError> {
        let has_tools = !request.tools.is_empty();
        let body = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: chat_messages(request.messages),
            stream: false,
            tools: has_tools.then(|| tool_definitions(request.tools)),
            tool_choice: has_tools.then(|| "auto".to_string()),
            max_tokens: request.max_tokens,
        };

        debug!(
            provider = %self.endpoint.provider,
            model = %self.endpoint.model,
            messages = body.messages.len(),
            tools = request.tools.len(),
            "Requesting chat completion"
        );

        let http_request = self
            .client
            .post(&self.endpoint.url)
            .header("Content-Type", "application/json");
        let http_request = match &self.endpoint.auth {
            Auth::None => http_request,
            Auth::Bearer(key) => http_request.header("Authorization", format!("Bearer {key}")),
            Auth::ApiKey(key) => http_request.header("api-key", key),
        };

        let response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ProviderError::from_http(
                status.as_u16(),
                extract_error_summary(&error_text),
            ));
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        parse_completion(parsed)
    }
}
