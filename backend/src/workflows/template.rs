// Workflow Templates - {{placeholder}} substitution over action configs

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use super::context::resolve_path;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern is valid")
});

static SOLE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{\{\s*([^{}\s]+)\s*\}\}\s*$").expect("placeholder pattern is valid")
});

/// How unresolved placeholders are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateMode {
    /// Fail the action before dispatch
    #[default]
    Strict,
    /// Leave the placeholder text in place
    Lenient,
}

impl std::str::FromStr for TemplateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown template mode: {other}")),
        }
    }
}

/// Output of a render pass
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub value: Value,
    /// Paths that had no value in the namespace, in first-seen order
    pub unresolved: Vec<String>,
}

impl Rendered {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Render every string inside `config` against `namespace`.
pub fn render(config: &Value, namespace: &Value) -> Rendered {
    let mut unresolved = Vec::new();
    let value = render_value(config, namespace, &mut unresolved);
    Rendered { value, unresolved }
}

fn render_value(value: &Value, namespace: &Value, unresolved: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => render_string(s, namespace, unresolved),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, namespace, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, namespace, unresolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(template: &str, namespace: &Value, unresolved: &mut Vec<String>) -> Value {
    // A lone placeholder keeps the JSON type of its value; null still renders as ""
    if let Some(caps) = SOLE_PLACEHOLDER.captures(template) {
        match resolve_path(namespace, &caps[1]) {
            Some(Value::String(_) | Value::Null) | None => {}
            Some(value) => return value.clone(),
        }
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let path = &caps[1];
        match resolve_path(namespace, path) {
            Some(value) => stringify(value),
            None => {
                if !unresolved.iter().any(|p| p == path) {
                    unresolved.push(path.to_string());
                }
                caps[0].to_string()
            }
        }
    });

    Value::String(rendered.into_owned())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
