//! `elicitation/create`: collect structured input from the user.
//!
//! Only flat schemas of primitive fields are supported. Every value is
//! validated against its field constraints before it is accepted; invalid
//! input is re-prompted rather than coerced.

use crate::core::interaction::{Interaction, UserInput};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::Url;
use rust_mcp_schema::RpcError;
use serde_json::{json, Map, Number, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitationAction {
    Accept,
    Decline,
    Cancel,
}

impl ElicitationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ElicitationAction::Accept => "accept",
            ElicitationAction::Decline => "decline",
            ElicitationAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
    Uri,
    Date,
    DateTime,
}

impl StringFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(StringFormat::Email),
            "uri" => Some(StringFormat::Uri),
            "date" => Some(StringFormat::Date),
            "date-time" => Some(StringFormat::DateTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        format: Option<StringFormat>,
        choices: Vec<Choice>,
    },
    Number {
        integer: bool,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Boolean,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Human-readable constraint summary shown before prompting.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(description) = self.description.as_deref() {
            if !description.trim().is_empty() {
                parts.push(description.trim().to_string());
            }
        }
        match &self.kind {
            FieldKind::String {
                min_length,
                max_length,
                format,
                choices,
            } => {
                if let Some(min) = min_length {
                    parts.push(format!("Minimum length: {min} characters."));
                }
                if let Some(max) = max_length {
                    parts.push(format!("Maximum length: {max} characters."));
                }
                match format {
                    Some(StringFormat::Email) => {
                        parts.push("Must be a valid email address (e.g. user@example.com).".into())
                    }
                    Some(StringFormat::Uri) => parts
                        .push("Must be a valid URL starting with http:// or https://.".into()),
                    Some(StringFormat::Date) => parts.push("Date in YYYY-MM-DD format.".into()),
                    Some(StringFormat::DateTime) => parts.push(
                        "Date and time in ISO 8601 format (YYYY-MM-DDTHH:MM:SS).".into(),
                    ),
                    None => {}
                }
                if !choices.is_empty() {
                    let options = choices
                        .iter()
                        .map(|choice| format!("'{}'", choice.label))
                        .collect::<Vec<_>>()
                        .join(", ");
                    parts.push(format!("Valid options: {options}."));
                }
            }
            FieldKind::Number {
                integer,
                minimum,
                maximum,
            } => {
                parts.push(if *integer {
                    "Whole number.".to_string()
                } else {
                    "Number.".to_string()
                });
                if let Some(min) = minimum {
                    parts.push(format!("Minimum value: {min}."));
                }
                if let Some(max) = maximum {
                    parts.push(format!("Maximum value: {max}."));
                }
            }
            FieldKind::Boolean => parts.push("Enter yes or no.".to_string()),
            FieldKind::Null => parts.push("Leave empty.".to_string()),
        }
        parts.join(" ")
    }

    /// Converts raw input into the field's JSON value or explains why not.
    pub fn validate(&self, input: &str) -> Result<Value, String> {
        let input = input.trim();
        match &self.kind {
            FieldKind::Null => {
                if input.is_empty() || input.eq_ignore_ascii_case("null") {
                    Ok(Value::Null)
                } else {
                    Err("This field only accepts an empty value.".to_string())
                }
            }
            FieldKind::Boolean => parse_boolean(input)
                .map(Value::Bool)
                .ok_or_else(|| format!("'{input}' is not a yes/no answer.")),
            FieldKind::Number {
                integer,
                minimum,
                maximum,
            } => {
                let (number, as_float) = if *integer {
                    let value = input
                        .parse::<i64>()
                        .map_err(|_| format!("'{input}' is not a valid integer."))?;
                    (Number::from(value), value as f64)
                } else {
                    let value = input
                        .parse::<f64>()
                        .ok()
                        .filter(|value| value.is_finite())
                        .ok_or_else(|| format!("'{input}' is not a valid number."))?;
                    let number = Number::from_f64(value)
                        .ok_or_else(|| format!("'{input}' is not a valid number."))?;
                    (number, value)
                };
                if let Some(min) = minimum {
                    if as_float < *min {
                        return Err(format!("Value must be at least {min}."));
                    }
                }
                if let Some(max) = maximum {
                    if as_float > *max {
                        return Err(format!("Value must be at most {max}."));
                    }
                }
                Ok(Value::Number(number))
            }
            FieldKind::String {
                min_length,
                max_length,
                format,
                choices,
            } => {
                if !choices.is_empty() {
                    return choices
                        .iter()
                        .find(|choice| choice.label == input || choice.value == input)
                        .or_else(|| {
                            choices.iter().find(|choice| {
                                choice.label.eq_ignore_ascii_case(input)
                                    || choice.value.eq_ignore_ascii_case(input)
                            })
                        })
                        .map(|choice| Value::String(choice.value.clone()))
                        .ok_or_else(|| format!("'{input}' is not one of the valid options."));
                }
                let length = input.chars().count();
                if let Some(min) = min_length {
                    if length < *min {
                        return Err(format!("Must be at least {min} characters."));
                    }
                }
                if let Some(max) = max_length {
                    if length > *max {
                        return Err(format!("Must be at most {max} characters."));
                    }
                }
                if let Some(format) = format {
                    check_format(*format, input)?;
                }
                Ok(Value::String(input.to_string()))
            }
        }
    }
}

fn parse_boolean(input: &str) -> Option<bool> {
    match input.to_ascii_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Some(true),
        "no" | "false" | "f" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn check_format(format: StringFormat, input: &str) -> Result<(), String> {
    let valid = match format {
        StringFormat::Email => is_email(input),
        StringFormat::Uri => Url::parse(input)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false),
        StringFormat::Date => NaiveDate::parse_from_str(input, "%Y-%m-%d").is_ok(),
        StringFormat::DateTime => {
            DateTime::parse_from_rfc3339(input).is_ok()
                || NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S").is_ok()
        }
    };
    if valid {
        return Ok(());
    }
    Err(match format {
        StringFormat::Email => "Please enter a valid email address.".to_string(),
        StringFormat::Uri => "Please enter a valid http:// or https:// URL.".to_string(),
        StringFormat::Date => "Please enter a date as YYYY-MM-DD.".to_string(),
        StringFormat::DateTime => "Please enter a date and time as YYYY-MM-DDTHH:MM:SS.".to_string(),
    })
}

fn is_email(input: &str) -> bool {
    let Some((local, domain)) = input.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !input.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Reads the requested schema into field specs, rejecting anything nested.
pub fn parse_schema(schema: &Value) -> Result<Vec<FieldSpec>, String> {
    if let Some(kind) = schema.get("type").and_then(Value::as_str) {
        if kind != "object" {
            return Err(format!("Requested schema must be an object, got '{kind}'."));
        }
    }
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    properties
        .iter()
        .map(|(name, property)| {
            let kind = parse_kind(name, property)?;
            Ok(FieldSpec {
                name: name.clone(),
                title: property.get("title").and_then(Value::as_str).map(str::to_string),
                description: property
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                required: required.contains(&name.as_str()),
                kind,
            })
        })
        .collect()
}

fn parse_kind(name: &str, property: &Value) -> Result<FieldKind, String> {
    let choices = parse_choices(property);
    let declared = property.get("type").and_then(Value::as_str);
    let kind = match declared {
        Some(kind) => kind,
        None if !choices.is_empty() => "string",
        None => return Err(format!("Field '{name}' has no type.")),
    };
    let as_usize = |key: &str| {
        property
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    };
    match kind {
        "string" => Ok(FieldKind::String {
            min_length: as_usize("minLength"),
            max_length: as_usize("maxLength"),
            format: property
                .get("format")
                .and_then(Value::as_str)
                .and_then(StringFormat::parse),
            choices,
        }),
        "number" | "integer" => Ok(FieldKind::Number {
            integer: kind == "integer",
            minimum: property.get("minimum").and_then(Value::as_f64),
            maximum: property.get("maximum").and_then(Value::as_f64),
        }),
        "boolean" => Ok(FieldKind::Boolean),
        "null" => Ok(FieldKind::Null),
        other => Err(format!(
            "Unsupported schema: field '{name}' has type '{other}'; only flat primitive fields are supported."
        )),
    }
}

fn parse_choices(property: &Value) -> Vec<Choice> {
    if let Some(values) = property.get("enum").and_then(Value::as_array) {
        let labels = property.get("enumNames").and_then(Value::as_array);
        return values
            .iter()
            .enumerate()
            .filter_map(|(index, value)| {
                let value = scalar_text(value)?;
                let label = labels
                    .and_then(|labels| labels.get(index))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.clone());
                Some(Choice { value, label })
            })
            .collect();
    }
    property
        .get("oneOf")
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|option| {
                    let value = scalar_text(option.get("const")?)?;
                    let label = option
                        .get("title")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| value.clone());
                    Some(Choice { value, label })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Serves `elicitation/create`.
pub async fn handle_elicitation(
    interaction: &dyn Interaction,
    server: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let schema = params
        .get("requestedSchema")
        .ok_or_else(|| RpcError::invalid_params().with_message("Missing requestedSchema."))?;
    let fields = parse_schema(schema).map_err(|err| RpcError::invalid_params().with_message(&err))?;

    interaction.info(&format!("Server '{server}' is requesting information: {message}"));
    let (action, content) = run_elicitation(interaction, &fields).await;
    debug!(server = %server, action = action.as_str(), "Elicitation finished");

    let mut result = json!({ "action": action.as_str() });
    if let Some(content) = content {
        result["content"] = Value::Object(content);
    }
    Ok(result)
}

/// Drives the accept/decline/cancel choice and field collection.
pub async fn run_elicitation(
    interaction: &dyn Interaction,
    fields: &[FieldSpec],
) -> (ElicitationAction, Option<Map<String, Value>>) {
    match ask_action(interaction).await {
        ElicitationAction::Accept => match collect_fields(interaction, fields).await {
            Some(content) => (ElicitationAction::Accept, Some(content)),
            None => (ElicitationAction::Cancel, None),
        },
        other => (other, None),
    }
}

async fn ask_action(interaction: &dyn Interaction) -> ElicitationAction {
    loop {
        match interaction
            .read_line("Provide this information? (yes/no/cancel): ")
            .await
        {
            UserInput::Line(answer) => match answer.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" => return ElicitationAction::Accept,
                "no" | "n" => return ElicitationAction::Decline,
                "cancel" | "c" => return ElicitationAction::Cancel,
                _ => interaction.warning("Please answer yes, no, or cancel."),
            },
            UserInput::Interrupted | UserInput::Closed => return ElicitationAction::Cancel,
        }
    }
}

async fn collect_fields(
    interaction: &dyn Interaction,
    fields: &[FieldSpec],
) -> Option<Map<String, Value>> {
    let mut content = Map::new();
    for field in fields {
        let description = field.describe();
        if !description.is_empty() {
            interaction.info(&format!("{}: {description}", field.label()));
        }
        let marker = if field.required { "required" } else { "optional" };
        let prompt = format!("{} ({marker}): ", field.label());

        loop {
            let input = match interaction.read_line(&prompt).await {
                UserInput::Line(input) => input,
                UserInput::Interrupted | UserInput::Closed => return None,
            };
            if input.trim().is_empty() && field.kind != FieldKind::Null {
                if field.required {
                    interaction.warning("This field is required.");
                    continue;
                }
                break;
            }
            match field.validate(&input) {
                Ok(value) => {
                    content.insert(field.name.clone(), value);
                    break;
                }
                Err(reason) => interaction.warning(&reason),
            }
        }
    }
    Some(content)
}
