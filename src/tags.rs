//! Field annotation parsing.
//!
//! Model fields carry a raw annotation string in the conventional
//! `key:"value" key2:"value2"` layout, for example
//! `json:"name" validate:"required,min=2" description:"user name" default:"anonymous"`.

use crate::reflect::DataKind;
use log::debug;
use serde_json::Value;

/// Namespaces checked for validation markers
const VALIDATION_KEYS: [&str; 2] = ["validate", "binding"];

/// A validation constraint declared in the `validate` namespace
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    /// Minimum value for numbers, minimum length for strings and arrays
    Min(f64),
    /// Maximum value for numbers, maximum length for strings and arrays
    Max(f64),
    Len(usize),
    OneOf(Vec<String>),
}

/// Look up the value stored under `key`.
///
/// Only exact key matches count: `lookup(r#"jsonx:"a" json:"b""#, "json")` is `Some("b")`.
pub fn lookup<'a>(tag: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = tag;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return None;
        }

        let colon = rest.find(':')?;
        let name = &rest[..colon];
        let after = &rest[colon + 1..];
        if !after.starts_with('"') || name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }

        let body = &after[1..];
        let end = closing_quote(body)?;
        if name == key {
            return Some(&body[..end]);
        }
        rest = &body[end + 1..];
    }
}

fn closing_quote(body: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

/// Value stored under `label`, or `fallback` when the annotation is absent.
pub fn field_tag(tag: &str, label: &str, fallback: &str) -> String {
    lookup(tag, label).unwrap_or(fallback).to_string()
}

/// Whether a validation namespace marks the field as required.
pub fn is_required(tag: &str) -> bool {
    VALIDATION_KEYS.iter().any(|key| {
        lookup(tag, key)
            .map(|rules| rules.split(',').any(|rule| rule.trim() == "required"))
            .unwrap_or(false)
    })
}

/// Human description of a field, falling back to `fallback`.
pub fn description(tag: &str, fallback: &str) -> String {
    match lookup(tag, "description") {
        Some(desc) if !desc.is_empty() => desc.to_string(),
        _ => fallback.to_string(),
    }
}

/// Serialized name from the `json` namespace.
///
/// Returns `None` for `json:"-"`, meaning the field never reaches the wire.
pub fn json_name(tag: &str, fallback: &str) -> Option<String> {
    match lookup(tag, "json") {
        Some("-") => None,
        Some(value) => {
            let name = value.split(',').next().unwrap_or("");
            if name.is_empty() {
                Some(fallback.to_string())
            } else {
                Some(name.to_string())
            }
        }
        None => Some(fallback.to_string()),
    }
}

/// Query-string name from the `query` namespace, then the `json` namespace.
pub fn query_name(tag: &str, fallback: &str) -> String {
    match lookup(tag, "query") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => json_name(tag, fallback).unwrap_or_else(|| fallback.to_string()),
    }
}

/// Parse the `default` annotation and coerce it to `kind`.
///
/// Parse failures degrade to `None`.
pub fn default_value(tag: &str, kind: DataKind) -> Option<Value> {
    let raw = lookup(tag, "default")?;
    let value = match kind {
        DataKind::String => Some(Value::String(raw.to_string())),
        DataKind::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
        DataKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        DataKind::Boolean => raw.trim().parse::<bool>().ok().map(Value::Bool),
        DataKind::Object | DataKind::Array => None,
    };

    if value.is_none() {
        debug!("Ignoring default value {:?} for {} field", raw, kind);
    }
    value
}

/// Constraints declared in the `validate` namespace.
pub fn constraints(tag: &str) -> Vec<Constraint> {
    let rules = match lookup(tag, "validate") {
        Some(rules) => rules,
        None => return Vec::new(),
    };

    let mut parsed = Vec::new();
    for rule in rules.split(',') {
        let (name, arg) = match rule.trim().split_once('=') {
            Some((name, arg)) => (name, arg.trim()),
            None => continue,
        };

        let number = arg.parse::<f64>().ok();
        let constraint = match (name, number) {
            ("gt", Some(n)) => Constraint::Gt(n),
            ("gte", Some(n)) => Constraint::Gte(n),
            ("lt", Some(n)) => Constraint::Lt(n),
            ("lte", Some(n)) => Constraint::Lte(n),
            ("min", Some(n)) => Constraint::Min(n),
            ("max", Some(n)) => Constraint::Max(n),
            ("len", Some(n)) if n >= 0.0 => Constraint::Len(n as usize),
            ("oneof", _) => {
                Constraint::OneOf(arg.split_whitespace().map(str::to_string).collect())
            }
            _ => {
                debug!("Unsupported validation rule: {}", rule);
                continue;
            }
        };
        parsed.push(constraint);
    }
    parsed
}
