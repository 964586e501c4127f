//! Prompt-template arguments: inline `key=value` parsing and interactive
//! collection of whatever is still missing.

use crate::core::interaction::{Interaction, UserInput};
use crate::mcp::session::PromptArgumentInfo;
use std::collections::HashMap;

/// Parses the text after the prompt name.
///
/// A prompt with a single argument also accepts a bare value.
pub(super) fn parse_inline_arguments(
    input: &str,
    arguments: &[PromptArgumentInfo],
) -> Result<HashMap<String, String>, String> {
    if input.trim().is_empty() {
        return Ok(HashMap::new());
    }

    match (parse_key_values(input), arguments) {
        (Ok(map), _) => Ok(map),
        (Err(_), [only]) => {
            let value = tokenize(input)?.join(" ");
            Ok(HashMap::from([(only.name.clone(), value)]))
        }
        (Err(err), _) => Err(err),
    }
}

pub(super) fn check_known_arguments(
    provided: &HashMap<String, String>,
    arguments: &[PromptArgumentInfo],
) -> Result<(), String> {
    let Some(unknown) = provided
        .keys()
        .find(|key| !arguments.iter().any(|arg| &arg.name == *key))
    else {
        return Ok(());
    };

    let mut allowed: Vec<&str> = arguments.iter().map(|arg| arg.name.as_str()).collect();
    allowed.sort_unstable();
    let allowed = if allowed.is_empty() {
        "none".to_string()
    } else {
        allowed.join(", ")
    };
    Err(format!(
        "Unknown prompt argument '{unknown}'. Allowed: {allowed}."
    ))
}

fn parse_key_values(input: &str) -> Result<HashMap<String, String>, String> {
    let mut parsed = HashMap::new();
    for token in tokenize(input)? {
        let Some((key, value)) = token.split_once('=') else {
            return Err(format!("Invalid prompt argument '{token}'. Use key=value."));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err("Prompt argument name cannot be empty.".to_string());
        }
        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(parsed)
}

/// Whitespace-separated words; single or double quotes group words.
fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match (ch, quote) {
            ('"' | '\'', None) => quote = Some(ch),
            ('"' | '\'', Some(open)) if open == ch => quote = None,
            (c, None) if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            (c, _) => current.push(c),
        }
    }
    if let Some(open) = quote {
        return Err(format!("Unclosed quote ({open}) in prompt arguments."));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Asks for every argument not already provided. Required arguments are
/// asked again until non-empty; optional ones may be skipped with an empty
/// line. `None` means the user interrupted or input ended.
pub(super) async fn collect_missing_arguments(
    interaction: &dyn Interaction,
    arguments: &[PromptArgumentInfo],
    mut provided: HashMap<String, String>,
) -> Option<HashMap<String, String>> {
    for argument in arguments {
        if provided.contains_key(&argument.name) {
            continue;
        }
        let requirement = if argument.is_required() {
            "required"
        } else {
            "optional"
        };
        let label = match argument.description.as_deref() {
            Some(description) if !description.trim().is_empty() => {
                format!("{} - {description} ({requirement}): ", argument.name)
            }
            _ => format!("{} ({requirement}): ", argument.name),
        };

        loop {
            let line = match interaction.read_line(&label).await {
                UserInput::Line(line) => line,
                UserInput::Interrupted | UserInput::Closed => return None,
            };
            let value = line.trim();
            if !value.is_empty() {
                provided.insert(argument.name.clone(), value.to_string());
                break;
            }
            if !argument.is_required() {
                break;
            }
            interaction.warning(&format!("'{}' is required.", argument.name));
        }
    }
    Some(provided)
}
