//! Owns every configured session: ordered start-up, aggregated listings and
//! teardown in reverse start-up order.

use crate::core::config::data::McpConfig;
use crate::mcp::callbacks::CallbackHandler;
use crate::mcp::client;
use crate::mcp::handle::SessionHandle;
use crate::mcp::registry::{qualify, split_qualified, NameError};
use crate::mcp::session::{
    Capabilities, PromptInfo, ResourceInfo, ResourceTemplateInfo, Session, SessionError,
    SessionResult, ToolDefinition,
};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
#[error("failed to initialize MCP server '{server}': {source}")]
pub struct InitError {
    pub server: String,
    #[source]
    pub source: SessionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    Tools,
    Resources,
    ResourceTemplates,
    Prompts,
}

impl ListingKind {
    /// Capability flag that must be set before the listing is attempted.
    pub fn enabled(self, capabilities: &Capabilities) -> bool {
        match self {
            ListingKind::Tools => capabilities.tools,
            ListingKind::Resources | ListingKind::ResourceTemplates => capabilities.resources,
            ListingKind::Prompts => capabilities.prompts,
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ListingKind::Tools => "tools",
            ListingKind::Resources => "resources",
            ListingKind::ResourceTemplates => "resource templates",
            ListingKind::Prompts => "prompts",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("failed to list {kind} from '{server}': {source}")]
pub struct ListingError {
    pub server: String,
    pub kind: ListingKind,
    #[source]
    pub source: SessionError,
}

/// A listed item tagged with the session that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Qualified<T> {
    pub session: String,
    pub item: T,
}

impl Qualified<ToolDefinition> {
    pub fn qualified_name(&self) -> String {
        qualify(&self.session, &self.item.name)
    }
}

impl Qualified<PromptInfo> {
    pub fn qualified_name(&self) -> String {
        qualify(&self.session, &self.item.name)
    }
}

impl Qualified<ResourceInfo> {
    pub fn qualified_name(&self) -> String {
        qualify(&self.session, &self.item.uri)
    }
}

#[derive(Default)]
pub struct SessionManager {
    handles: Vec<SessionHandle>,
    init_order: Vec<usize>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// One session per configured server, in file order. Nothing is spawned
    /// or contacted until [`SessionManager::initialize_all`].
    pub fn from_config(config: &McpConfig) -> Result<Self, InitError> {
        let mut manager = Self::new();
        for (name, server) in &config.servers {
            let session = client::connect(name, server).map_err(|source| InitError {
                server: name.clone(),
                source,
            })?;
            manager.add(name.clone(), session);
        }
        Ok(manager)
    }

    pub fn add(&mut self, name: impl Into<String>, session: Arc<dyn Session>) {
        self.handles.push(SessionHandle::new(name, session));
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[SessionHandle] {
        &self.handles
    }

    pub fn get(&self, name: &str) -> Option<&SessionHandle> {
        self.handles.iter().find(|handle| handle.name() == name)
    }

    /// Names of successfully initialized sessions, oldest first.
    pub fn init_order(&self) -> Vec<&str> {
        self.init_order
            .iter()
            .map(|index| self.handles[*index].name())
            .collect()
    }

    /// Initializes sessions one at a time in configuration order.
    ///
    /// The first failure tears down every session started so far, newest
    /// first, and is returned without touching the remaining sessions.
    pub async fn initialize_all(
        &mut self,
        debug: bool,
        callbacks: Arc<dyn CallbackHandler>,
    ) -> Result<Vec<(String, Capabilities)>, InitError> {
        let mut ready = Vec::with_capacity(self.handles.len());
        for index in 0..self.handles.len() {
            if self.init_order.contains(&index) {
                continue;
            }
            let handle = &mut self.handles[index];
            match handle.initialize(debug, callbacks.clone()).await {
                Ok(capabilities) => {
                    info!(
                        server = %handle.name(),
                        capabilities = %capabilities.summary(),
                        "MCP server initialized"
                    );
                    ready.push((handle.name().to_string(), capabilities));
                    self.init_order.push(index);
                }
                Err(source) => {
                    let server = handle.name().to_string();
                    error!(server = %server, error = %source, "Aborting start-up");
                    self.cleanup_all().await;
                    return Err(InitError { server, source });
                }
            }
        }
        Ok(ready)
    }

    /// Tears down initialized sessions in reverse order. Individual failures
    /// are logged; calling this again is a no-op for sessions already closed.
    pub async fn cleanup_all(&self) {
        for index in self.init_order.iter().rev() {
            let handle = &self.handles[*index];
            match handle.cleanup().await {
                Ok(true) => debug!(server = %handle.name(), "MCP server closed"),
                Ok(false) => {}
                Err(err) => {
                    warn!(server = %handle.name(), error = %err, "Error during MCP server cleanup")
                }
            }
        }
    }

    async fn list_aggregated<'a, T, F, Fut>(
        &'a self,
        kind: ListingKind,
        fetch: F,
    ) -> Result<Vec<Qualified<T>>, ListingError>
    where
        F: Fn(&'a SessionHandle) -> Fut,
        Fut: Future<Output = SessionResult<Vec<T>>>,
    {
        let mut items = Vec::new();
        for handle in &self.handles {
            if !handle.is_ready() || !kind.enabled(&handle.capabilities()) {
                continue;
            }
            match fetch(handle).await {
                Ok(listed) => {
                    debug!(server = %handle.name(), kind = %kind, count = listed.len(), "Listed MCP items");
                    items.extend(listed.into_iter().map(|item| Qualified {
                        session: handle.name().to_string(),
                        item,
                    }));
                }
                Err(err) if kind == ListingKind::ResourceTemplates && err.is_method_not_found() => {
                    debug!(server = %handle.name(), "Server does not support resource templates");
                }
                Err(source) => {
                    return Err(ListingError {
                        server: handle.name().to_string(),
                        kind,
                        source,
                    })
                }
            }
        }
        Ok(items)
    }

    pub async fn list_tools(&self) -> Result<Vec<Qualified<ToolDefinition>>, ListingError> {
        self.list_aggregated(ListingKind::Tools, |handle| handle.list_tools())
            .await
    }

    pub async fn list_resources(&self) -> Result<Vec<Qualified<ResourceInfo>>, ListingError> {
        self.list_aggregated(ListingKind::Resources, |handle| handle.list_resources())
            .await
    }

    pub async fn list_resource_templates(
        &self,
    ) -> Result<Vec<Qualified<ResourceTemplateInfo>>, ListingError> {
        self.list_aggregated(ListingKind::ResourceTemplates, |handle| {
            handle.list_resource_templates()
        })
        .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Qualified<PromptInfo>>, ListingError> {
        self.list_aggregated(ListingKind::Prompts, |handle| handle.list_prompts())
            .await
    }
}

/// Resource URI → sessions exposing it, in listing order.
#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    entries: BTreeMap<String, Vec<String>>,
}

impl ResourceIndex {
    pub fn from_listing(resources: &[Qualified<ResourceInfo>]) -> Self {
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for resource in resources {
            let sessions = entries.entry(resource.item.uri.clone()).or_default();
            if !sessions.contains(&resource.session) {
                sessions.push(resource.session.clone());
            }
        }
        Self { entries }
    }

    pub async fn build_from(manager: &SessionManager) -> Result<Self, ListingError> {
        Ok(Self::from_listing(&manager.list_resources().await?))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sessions_for(&self, uri: &str) -> &[String] {
        self.entries.get(uri).map(Vec::as_slice).unwrap_or_default()
    }

    /// Picks the owning session for `input`, either a bare URI offered by
    /// exactly one session or `server__uri`.
    pub fn resolve(&self, input: &str) -> Result<(String, String), NameError> {
        let input = input.trim();
        match self.entries.get(input).map(Vec::as_slice) {
            Some([only]) => return Ok((only.clone(), input.to_string())),
            Some(servers) if !servers.is_empty() => {
                return Err(NameError::AmbiguousResource {
                    uri: input.to_string(),
                    servers: servers.to_vec(),
                })
            }
            _ => {}
        }

        if let Ok((server, uri)) = split_qualified(input) {
            if self.sessions_for(uri).iter().any(|owner| owner == server) {
                return Ok((server.to_string(), uri.to_string()));
            }
        }
        Err(NameError::UnknownResource {
            uri: input.to_string(),
        })
    }
}
