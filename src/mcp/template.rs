//! URI templates for resource templates (RFC 6570 up to level 3).
//!
//! Query expressions (`{?a,b}`, `{&c}`) are optional: absent variables are
//! left out of the URI. Every other expression requires its variables.
//! Explode (`*`) and prefix (`:n`) modifiers are accepted and ignored.

use serde_json::{Map, Value};

struct Operator {
    first: &'static str,
    separator: &'static str,
    named: bool,
    if_empty: &'static str,
    allow_reserved: bool,
    optional: bool,
}

const SIMPLE: Operator = Operator {
    first: "",
    separator: ",",
    named: false,
    if_empty: "",
    allow_reserved: false,
    optional: false,
};

fn operator(symbol: Option<char>) -> Operator {
    match symbol {
        Some('+') => Operator {
            allow_reserved: true,
            ..SIMPLE
        },
        Some('#') => Operator {
            first: "#",
            allow_reserved: true,
            ..SIMPLE
        },
        Some('.') => Operator {
            first: ".",
            separator: ".",
            ..SIMPLE
        },
        Some('/') => Operator {
            first: "/",
            separator: "/",
            ..SIMPLE
        },
        Some(';') => Operator {
            first: ";",
            separator: ";",
            named: true,
            ..SIMPLE
        },
        Some('?') => Operator {
            first: "?",
            separator: "&",
            named: true,
            if_empty: "=",
            optional: true,
            ..SIMPLE
        },
        Some('&') => Operator {
            first: "&",
            separator: "&",
            named: true,
            if_empty: "=",
            optional: true,
            ..SIMPLE
        },
        _ => SIMPLE,
    }
}

/// Splits `{...}` contents into its operator and variable names.
fn parse_expression(expression: &str) -> (Option<char>, Vec<&str>) {
    let symbol = expression
        .chars()
        .next()
        .filter(|c| matches!(c, '+' | '#' | '.' | '/' | ';' | '?' | '&'));
    let body = match symbol {
        Some(c) => &expression[c.len_utf8()..],
        None => expression,
    };
    let names = body
        .split(',')
        .map(|name| {
            let name = name.trim().trim_end_matches('*');
            name.split_once(':').map_or(name, |(name, _)| name)
        })
        .filter(|name| !name.is_empty())
        .collect();
    (symbol, names)
}

/// Complete `{...}` expressions of `template`, in order.
fn expressions(template: &str) -> Vec<(Option<char>, Vec<&str>)> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        found.push(parse_expression(&after[..end]));
        rest = &after[end + 1..];
    }
    found
}

fn push_unique(variables: &mut Vec<String>, name: &str) {
    if !variables.iter().any(|existing| existing == name) {
        variables.push(name.to_string());
    }
}

/// Ordered, de-duplicated variable names in `template`.
pub fn template_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    for (_, names) in expressions(template) {
        for name in names {
            push_unique(&mut variables, name);
        }
    }
    variables
}

/// Variables that must be supplied; query variables are optional.
pub fn required_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    for (symbol, names) in expressions(template) {
        if operator(symbol).optional {
            continue;
        }
        for name in names {
            push_unique(&mut variables, name);
        }
    }
    variables
}

/// Expands `template` with `arguments`.
///
/// Returns the first missing required variable as the error.
pub fn expand_template(template: &str, arguments: &Map<String, Value>) -> Result<String, String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };
        let (symbol, names) = parse_expression(&after[..end]);
        output.push_str(&expand_expression(symbol, &names, arguments)?);
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

fn expand_expression(
    symbol: Option<char>,
    names: &[&str],
    arguments: &Map<String, Value>,
) -> Result<String, String> {
    let op = operator(symbol);
    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let value = match arguments.get(*name) {
            Some(Value::Null) | None if op.optional => continue,
            Some(value) => argument_text(value),
            None => return Err(name.to_string()),
        };
        let value = if op.allow_reserved {
            value
        } else {
            urlencoding::encode(&value).into_owned()
        };
        let part = match (op.named, value.is_empty()) {
            (true, true) => format!("{name}{}", op.if_empty),
            (true, false) => format!("{name}={value}"),
            (false, _) => value,
        };
        parts.push(part);
    }
    if parts.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}{}", op.first, parts.join(op.separator)))
}

fn argument_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
