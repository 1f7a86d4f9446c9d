//! Template engine for rendering action configurations.

use minijinja::Environment;
use std::collections::HashMap;

use crate::error::ToolError;

/// Replacement written over secret material in event context copies.
pub const REDACTED: &str = "[REDACTED]";

/// Replace every occurrence of the given secret strings inside a value
/// with [`REDACTED`]. Applied to anything that leaves the worker as event
/// payload or context; the rendered originals are used only in executor
/// invocations.
pub fn redact(value: &serde_json::Value, secrets: &[&str]) -> serde_json::Value {
    if secrets.is_empty() {
        return value.clone();
    }

    match value {
        serde_json::Value::String(s) => {
            let mut out = s.clone();
            for secret in secrets {
                if !secret.is_empty() && out.contains(secret) {
                    out = out.replace(secret, REDACTED);
                }
            }
            serde_json::Value::String(out)
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact(v, secrets)))
                .collect(),
        ),
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(|v| redact(v, secrets)).collect())
        }
        _ => value.clone(),
    }
}

/// Template engine with Jinja2-compatible syntax.
///
/// A lighter sibling of the server-side renderer: executors only need
/// string and recursive-value rendering against an already-flattened
/// environment.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.add_filter("tojson", filter_tojson);
        env.add_filter("default", filter_default);
        env.add_filter("upper", |v: String| v.to_uppercase());
        env.add_filter("lower", |v: String| v.to_lowercase());
        env.add_filter("trim", |v: String| v.trim().to_string());

        Self { env }
    }

    /// Check if a string contains template syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render a template string with the given context.
    pub fn render(
        &self,
        template: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        if !Self::is_template(template) {
            return Ok(template.to_string());
        }

        let tmpl = self.env.template_from_str(template)?;
        tmpl.render(context)
            .map_err(|e| ToolError::Template(e.to_string()))
    }

    /// Render a value that might contain templates, recursively.
    ///
    /// Leaf strings with template syntax are rendered; the result is
    /// re-parsed as JSON when it looks like JSON, otherwise kept as a string.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        match value {
            serde_json::Value::String(s) if Self::is_template(s) => {
                let rendered = self.render(s, context)?;
                Ok(serde_json::from_str(&rendered)
                    .unwrap_or_else(|_| serde_json::Value::String(rendered)))
            }
            serde_json::Value::Object(obj) => {
                let mut result = serde_json::Map::new();
                for (k, v) in obj {
                    result.insert(k.clone(), self.render_value(v, context)?);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(arr) => {
                let result: Result<Vec<_>, _> =
                    arr.iter().map(|v| self.render_value(v, context)).collect();
                Ok(serde_json::Value::Array(result?))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_tojson(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            format!("tojson error: {}", e),
        )
    })
}

fn filter_default(value: minijinja::Value, default: Option<minijinja::Value>) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or_else(|| minijinja::Value::from(""))
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_context() -> HashMap<String, serde_json::Value> {
        let mut ctx = HashMap::new();
        ctx.insert("name".to_string(), serde_json::json!("alice"));
        ctx.insert("count".to_string(), serde_json::json!(3));
        ctx
    }

    #[test]
    fn test_plain_string_passthrough() {
        let engine = TemplateEngine::new();
        let result = engine.render("no templates here", &make_context()).unwrap();
        assert_eq!(result, "no templates here");
    }

    #[test]
    fn test_render_variable() {
        let engine = TemplateEngine::new();
        let result = engine.render("hello {{ name }}", &make_context()).unwrap();
        assert_eq!(result, "hello alice");
    }

    #[test]
    fn test_render_value_recursive() {
        let engine = TemplateEngine::new();
        let value = serde_json::json!({
            "url": "https://example.com/{{ name }}",
            "nested": {"count": "{{ count }}"},
            "list": ["{{ name }}", "literal"],
        });

        let result = engine.render_value(&value, &make_context()).unwrap();
        assert_eq!(result["url"], "https://example.com/alice");
        assert_eq!(result["nested"]["count"], 3);
        assert_eq!(result["list"][0], "alice");
        assert_eq!(result["list"][1], "literal");
    }

    #[test]
    fn test_default_filter() {
        let engine = TemplateEngine::new();
        let result = engine
            .render("{{ missing | default('fallback') }}", &make_context())
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_redact_string_values() {
        let context = serde_json::json!({
            "url": "https://example.com?token=tok-12345",
            "nested": {"auth_header": "Bearer tok-12345"},
            "count": 3,
        });

        let redacted = redact(&context, &["tok-12345"]);
        assert_eq!(redacted["url"], "https://example.com?token=[REDACTED]");
        assert_eq!(redacted["nested"]["auth_header"], "Bearer [REDACTED]");
        assert_eq!(redacted["count"], 3);
    }

    #[test]
    fn test_redact_no_secrets_is_identity() {
        let context = serde_json::json!({"a": "b"});
        assert_eq!(redact(&context, &[]), context);
    }
}
