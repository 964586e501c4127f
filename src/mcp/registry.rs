//! Unified tool namespace across every connected server.
//!
//! Native tools and resource-template pseudo-tools share one list keyed by
//! qualified name (`{session}__{local}`). Exclusions only filter what the
//! model sees; the underlying listings are never mutated.

use crate::core::provider::ToolSpec;
use crate::mcp::manager::{ListingError, Qualified, SessionManager};
use crate::mcp::session::{ResourceTemplateInfo, ToolDefinition};
use crate::mcp::template::{required_variables, template_variables};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Joins a session name and a local name.
pub const NAME_SEPARATOR: &str = "__";
/// Local-name prefix of tools synthesized from resource templates.
pub const TEMPLATE_TOOL_PREFIX: &str = "resource_template_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("invalid qualified name '{name}'; expected <server>__<name>")]
    Malformed { name: String },
    #[error("no tool named '{name}' is registered")]
    UnknownTool { name: String },
    #[error("resource '{uri}' is offered by several servers ({}); use <server>__<uri>", .servers.join(", "))]
    AmbiguousResource { uri: String, servers: Vec<String> },
    #[error("no server offers resource '{uri}'")]
    UnknownResource { uri: String },
}

pub fn qualify(session: &str, local: &str) -> String {
    format!("{session}{NAME_SEPARATOR}{local}")
}

/// Splits at the first separator. Server names never contain it, so local
/// names may.
pub fn split_qualified(name: &str) -> Result<(&str, &str), NameError> {
    match name.split_once(NAME_SEPARATOR) {
        Some((session, local)) if !session.is_empty() && !local.is_empty() => Ok((session, local)),
        _ => Err(NameError::Malformed {
            name: name.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOrigin {
    Native,
    ResourceTemplate {
        uri_template: String,
        variables: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedTool {
    pub session: String,
    pub local_name: String,
    pub description: String,
    pub input_schema: Value,
    pub origin: ToolOrigin,
}

impl QualifiedTool {
    pub fn native(session: &str, tool: ToolDefinition) -> Self {
        Self {
            session: session.to_string(),
            local_name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
            origin: ToolOrigin::Native,
        }
    }

    /// Pseudo-tool whose arguments are exactly the template's variables.
    pub fn from_template(session: &str, index: usize, template: &ResourceTemplateInfo) -> Self {
        let variables = template_variables(&template.uri_template);
        let properties: Map<String, Value> = variables
            .iter()
            .map(|variable| {
                (
                    variable.clone(),
                    json!({
                        "type": "string",
                        "description": format!("Value for '{variable}' in {}", template.uri_template),
                    }),
                )
            })
            .collect();
        let description = template
            .description
            .as_deref()
            .filter(|description| !description.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Get resource from url: {}", template.uri_template));

        Self {
            session: session.to_string(),
            local_name: format!("{TEMPLATE_TOOL_PREFIX}{index}"),
            description,
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required_variables(&template.uri_template),
            }),
            origin: ToolOrigin::ResourceTemplate {
                uri_template: template.uri_template.clone(),
                variables,
            },
        }
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.session, &self.local_name)
    }

    pub fn is_template(&self) -> bool {
        matches!(self.origin, ToolOrigin::ResourceTemplate { .. })
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.qualified_name(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// Qualified names the user removed from the active list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: BTreeSet<String>,
}

impl ExclusionSet {
    /// Returns false when the name was already excluded.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<QualifiedTool>,
    excluded: ExclusionSet,
}

impl ToolRegistry {
    /// Native tools of every tool-capable session followed by the
    /// pseudo-tools of every resource-capable session.
    pub async fn build_from(manager: &SessionManager) -> Result<Self, ListingError> {
        let native = manager.list_tools().await?;
        let templates = manager.list_resource_templates().await?;
        Ok(Self::from_listings(native, templates))
    }

    pub fn from_listings(
        native: Vec<Qualified<ToolDefinition>>,
        templates: Vec<Qualified<ResourceTemplateInfo>>,
    ) -> Self {
        let mut tools: Vec<QualifiedTool> = native
            .into_iter()
            .map(|entry| QualifiedTool::native(&entry.session, entry.item))
            .collect();

        let mut next_index: Vec<(String, usize)> = Vec::new();
        for entry in &templates {
            let index = match next_index
                .iter_mut()
                .find(|(session, _)| *session == entry.session)
            {
                Some((_, counter)) => {
                    *counter += 1;
                    *counter - 1
                }
                None => {
                    next_index.push((entry.session.clone(), 1));
                    0
                }
            };
            tools.push(QualifiedTool::from_template(&entry.session, index, &entry.item));
        }

        Self::from_tools(tools)
    }

    /// Keeps the first tool of each qualified name.
    pub fn from_tools(tools: Vec<QualifiedTool>) -> Self {
        let mut seen = HashSet::new();
        let tools = tools
            .into_iter()
            .filter(|tool| {
                let name = tool.qualified_name();
                if seen.insert(name.clone()) {
                    true
                } else {
                    warn!(tool = %name, "Ignoring duplicate tool definition");
                    false
                }
            })
            .collect();
        Self {
            tools,
            excluded: ExclusionSet::default(),
        }
    }

    pub fn all(&self) -> &[QualifiedTool] {
        &self.tools
    }

    pub fn active(&self) -> impl Iterator<Item = &QualifiedTool> {
        self.tools
            .iter()
            .filter(|tool| !self.excluded.contains(&tool.qualified_name()))
    }

    pub fn active_specs(&self) -> Vec<ToolSpec> {
        self.active().map(QualifiedTool::spec).collect()
    }

    pub fn excluded(&self) -> &ExclusionSet {
        &self.excluded
    }

    /// Excludes every tool whose qualified name ends with `suffix` and
    /// returns the names that were newly excluded.
    pub fn exclude(&mut self, suffix: &str) -> Vec<String> {
        let suffix = suffix.trim();
        if suffix.is_empty() {
            return Vec::new();
        }
        let matching: Vec<String> = self
            .tools
            .iter()
            .map(QualifiedTool::qualified_name)
            .filter(|name| name.ends_with(suffix))
            .collect();
        let mut added = Vec::new();
        for name in matching {
            if self.excluded.insert(name.clone()) {
                debug!(tool = %name, "Excluded tool");
                added.push(name);
            }
        }
        added
    }

    /// Finds an active tool by qualified name.
    pub fn resolve(&self, qualified_name: &str) -> Result<&QualifiedTool, NameError> {
        let (session, local) = split_qualified(qualified_name)?;
        self.active()
            .find(|tool| tool.session == session && tool.local_name == local)
            .ok_or_else(|| NameError::UnknownTool {
                name: qualified_name.to_string(),
            })
    }
}
