//! Trigger message templates.
//!
//! Templates contain `${...}` placeholders holding a property path over the
//! serialized container record, optionally followed by whitelisted string
//! method calls: `${name.upper()}`, `${image.tag.value}`. Anything
//! unresolvable or not whitelisted renders as the empty string, never an
//! error.

use serde_json::Value;
use tracing::debug;

use crate::types::ContainerRecord;

/// Whitelisted pure string methods.
const METHODS: &[&str] = &["upper", "lower", "trim"];

/// Render a template against a container record.
pub fn render(template: &str, container: &ContainerRecord) -> String {
    let root = serde_json::to_value(container).unwrap_or(Value::Null);
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                output.push_str(&eval(&after[..end], &root));
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder; emit the remainder verbatim.
                output.push_str(&rest[start..]);
                return output;
            }
        }
    }
    output.push_str(rest);
    output
}

/// Evaluate one placeholder expression: a dot-separated property path with
/// optional trailing method calls.
fn eval(expr: &str, root: &Value) -> String {
    let mut value = root;
    let mut methods: Vec<&str> = Vec::new();

    for segment in expr.split('.') {
        let segment = segment.trim();
        if let Some(name) = segment.strip_suffix("()") {
            if METHODS.contains(&name) {
                methods.push(name);
                continue;
            }
            debug!(method = name, "Template method not whitelisted");
            return String::new();
        }
        if !methods.is_empty() {
            // Property segments after a method call are malformed.
            return String::new();
        }
        match value.get(segment) {
            Some(next) => value = next,
            None => return String::new(),
        }
    }

    let mut rendered = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return String::new(),
    };
    for method in methods {
        rendered = match method {
            "upper" => rendered.to_uppercase(),
            "lower" => rendered.to_lowercase(),
            "trim" => rendered.trim().to_string(),
            _ => rendered,
        };
    }
    rendered
}
