//! Jinja2-style template rendering using minijinja.
//!
//! Rendering is side-effect-free: the environment is a read-only mapping
//! and every call renders from scratch. Two minijinja environments are
//! kept: a lenient one for value rendering and a strict one for `when`
//! predicates, where an undefined reference must surface as an error
//! rather than silently evaluating false.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use std::collections::HashMap;

use crate::error::{AppError, AppResult};

/// Template renderer with custom filters and tests.
pub struct TemplateRenderer {
    env: Environment<'static>,
    strict_env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    /// Create a new template renderer.
    pub fn new() -> Self {
        let mut env = Environment::new();
        install_extensions(&mut env);

        let mut strict_env = Environment::new();
        strict_env.set_undefined_behavior(UndefinedBehavior::Strict);
        install_extensions(&mut strict_env);

        Self { env, strict_env }
    }

    /// Render a template string with the given context.
    pub fn render(
        &self,
        template: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> AppResult<String> {
        // Quick check for non-template strings
        if !contains_template_syntax(template) {
            return Ok(template.to_string());
        }

        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| AppError::Template(format!("Template parse error: {}", e)))?;

        tmpl.render(context)
            .map_err(|e| AppError::Template(format!("Template render error: {}", e)))
    }

    /// Render a template and return the result as a JSON value.
    ///
    /// The rendered string is re-parsed as JSON when it looks like JSON,
    /// and as a primitive when it parses as one.
    pub fn render_to_value(
        &self,
        template: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> AppResult<serde_json::Value> {
        // A template that is exactly one expression evaluates through
        // minijinja's value path so lists and mappings survive unquoted.
        if let Some(expr) = single_expression(template) {
            if let Ok(compiled) = self.env.compile_expression(expr) {
                let value = compiled
                    .eval(context)
                    .map_err(|e| AppError::Template(format!("Template render error: {}", e)))?;
                return Ok(minijinja_to_json(&value));
            }
        }

        let rendered = self.render(template, context)?;
        Ok(parse_rendered(rendered))
    }

    /// Render a nested structure (mapping or list) recursively.
    ///
    /// Every leaf string is rendered independently; non-string leaves pass
    /// through untouched.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &HashMap<String, serde_json::Value>,
    ) -> AppResult<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => self.render_to_value(s, context),
            serde_json::Value::Object(map) => {
                let mut result = serde_json::Map::new();
                for (k, v) in map {
                    let rendered_key = self.render(k, context)?;
                    let rendered_value = self.render_value(v, context)?;
                    result.insert(rendered_key, rendered_value);
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

    /// Evaluate a `when` predicate.
    ///
    /// Undefined references are a `TemplateError`, not `false`: a predicate
    /// over a name that does not exist is a playbook bug that must surface.
    pub fn evaluate_condition(
        &self,
        condition: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> AppResult<bool> {
        // Wrap bare expressions in {{ }}
        let template = if contains_template_syntax(condition) {
            condition.to_string()
        } else {
            format!("{{{{ {} }}}}", condition)
        };

        let tmpl = self
            .strict_env
            .template_from_str(&template)
            .map_err(|e| AppError::Template(format!("Predicate parse error: {}", e)))?;

        let rendered = tmpl
            .render(context)
            .map_err(|e| AppError::Template(format!("Predicate error: {}", e)))?;

        let trimmed = rendered.trim().to_lowercase();
        Ok(matches!(trimmed.as_str(), "true" | "1" | "yes"))
    }

}

/// Check if a string contains Jinja2 template syntax.
fn contains_template_syntax(s: &str) -> bool {
    (s.contains("{{") && s.contains("}}")) || (s.contains("{%") && s.contains("%}"))
}

/// If the template is exactly `{{ expr }}`, return the inner expression.
fn single_expression(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Parse a rendered string back into a JSON value.
fn parse_rendered(rendered: String) -> serde_json::Value {
    let trimmed = rendered.trim();

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }

    if let Ok(b) = trimmed.parse::<bool>() {
        return serde_json::Value::Bool(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return serde_json::Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    if trimmed == "null" || trimmed == "none" || trimmed.is_empty() {
        return serde_json::Value::Null;
    }

    serde_json::Value::String(rendered)
}

/// Install custom filters and tests on an environment.
fn install_extensions(env: &mut Environment<'static>) {
    env.add_filter("b64encode", filter_b64encode);
    env.add_filter("b64decode", filter_b64decode);
    env.add_filter("tojson", filter_tojson);
    env.add_filter("fromjson", filter_fromjson);
    env.add_filter("default", filter_default);
    env.add_filter("int", filter_int);
    env.add_filter("float", filter_float);
    env.add_filter("string", filter_string);
    env.add_filter("lower", filter_lower);
    env.add_filter("upper", filter_upper);
    env.add_filter("trim", filter_trim);
    env.add_filter("split", filter_split);
    env.add_filter("join", filter_join);
    env.add_filter("first", filter_first);
    env.add_filter("last", filter_last);
    env.add_filter("length", filter_length);
    env.add_filter("get", filter_get);

    env.add_test("defined", test_defined);
    env.add_test("undefined", test_undefined);
    env.add_test("none", test_none);
}

// ============================================================================
// Custom Filters
// ============================================================================

fn filter_b64encode(value: &Value) -> Result<String, Error> {
    Ok(BASE64.encode(value.to_string().as_bytes()))
}

fn filter_b64decode(value: &Value) -> Result<String, Error> {
    let decoded = BASE64.decode(value.to_string().as_bytes()).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("b64decode error: {}", e),
        )
    })?;
    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("utf8 error: {}", e)))
}

fn filter_tojson(value: &Value) -> Result<String, Error> {
    let json_val = minijinja_to_json(value);
    serde_json::to_string(&json_val)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("tojson error: {}", e)))
}

fn filter_fromjson(value: &Value) -> Result<Value, Error> {
    let json_val: serde_json::Value = serde_json::from_str(&value.to_string()).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("fromjson error: {}", e),
        )
    })?;
    Ok(Value::from_serialize(&json_val))
}

fn filter_default(value: &Value, default: Option<&Value>) -> Value {
    if value.is_undefined() || value.is_none() {
        default.cloned().unwrap_or(Value::from(""))
    } else {
        value.clone()
    }
}

fn filter_int(value: &Value) -> Result<i64, Error> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    let s = value.to_string();
    if let Ok(f) = s.parse::<f64>() {
        return Ok(f as i64);
    }
    s.parse::<i64>()
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("int error: {}", e)))
}

fn filter_float(value: &Value) -> Result<f64, Error> {
    if let Some(i) = value.as_i64() {
        return Ok(i as f64);
    }
    value
        .to_string()
        .parse::<f64>()
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("float error: {}", e)))
}

fn filter_string(value: &Value) -> String {
    value.to_string()
}

fn filter_lower(value: &Value) -> String {
    value.to_string().to_lowercase()
}

fn filter_upper(value: &Value) -> String {
    value.to_string().to_uppercase()
}

fn filter_trim(value: &Value) -> String {
    value.to_string().trim().to_string()
}

fn filter_split(value: &Value, sep: Option<&Value>) -> Vec<String> {
    let s = value.to_string();
    let separator = sep
        .map(|v| v.to_string())
        .unwrap_or_else(|| " ".to_string());
    s.split(&separator).map(|s| s.to_string()).collect()
}

fn filter_join(value: &Value, sep: Option<&Value>) -> Result<String, Error> {
    let separator = sep.map(|v| v.to_string()).unwrap_or_default();
    let iter = value
        .try_iter()
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "join requires a sequence"))?;
    let items: Vec<String> = iter.map(|v| v.to_string()).collect();
    Ok(items.join(&separator))
}

fn filter_first(value: &Value) -> Result<Value, Error> {
    let mut iter = value
        .try_iter()
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "first requires a sequence"))?;
    iter.next()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "sequence is empty"))
}

fn filter_last(value: &Value) -> Result<Value, Error> {
    let iter = value
        .try_iter()
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "last requires a sequence"))?;
    iter.last()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "sequence is empty"))
}

fn filter_length(value: &Value) -> Result<usize, Error> {
    if let Some(s) = value.as_str() {
        return Ok(s.len());
    }
    if let Some(len) = value.len() {
        return Ok(len);
    }
    Err(Error::new(
        ErrorKind::InvalidOperation,
        "length requires string, sequence, or mapping",
    ))
}

fn filter_get(value: &Value, key: &Value) -> Value {
    value.get_item(key).unwrap_or(Value::UNDEFINED)
}

// ============================================================================
// Custom Tests
// ============================================================================

fn test_defined(value: &Value) -> bool {
    !value.is_undefined()
}

fn test_undefined(value: &Value) -> bool {
    value.is_undefined()
}

fn test_none(value: &Value) -> bool {
    value.is_none()
}

/// Convert a minijinja Value back to serde_json::Value.
fn minijinja_to_json(value: &Value) -> serde_json::Value {
    if value.is_undefined() || value.is_none() {
        return serde_json::Value::Null;
    }
    if value.kind() == minijinja::value::ValueKind::Bool {
        return serde_json::Value::Bool(value.is_true());
    }
    if let Some(i) = value.as_i64() {
        return serde_json::Value::Number(i.into());
    }
    if value.kind() == minijinja::value::ValueKind::Number {
        if let Ok(f) = value.to_string().parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return serde_json::Value::Number(n);
            }
        }
    }
    if let Some(s) = value.as_str() {
        return serde_json::Value::String(s.to_string());
    }
    if value.kind() == minijinja::value::ValueKind::Seq {
        if let Ok(iter) = value.try_iter() {
            let arr: Vec<serde_json::Value> = iter.map(|v| minijinja_to_json(&v)).collect();
            return serde_json::Value::Array(arr);
        }
    }
    if value.kind() == minijinja::value::ValueKind::Map {
        let mut map = serde_json::Map::new();
        if let Ok(iter) = value.try_iter() {
            for key in iter {
                if let Ok(val) = value.get_item(&key) {
                    map.insert(key.to_string(), minijinja_to_json(&val));
                }
            }
        }
        return serde_json::Value::Object(map);
    }
    serde_json::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_context() -> HashMap<String, serde_json::Value> {
        let mut ctx = HashMap::new();
        ctx.insert("name".to_string(), serde_json::json!("Alice"));
        ctx.insert("age".to_string(), serde_json::json!(30));
        ctx.insert("active".to_string(), serde_json::json!(true));
        ctx.insert(
            "items".to_string(),
            serde_json::json!(["apple", "banana", "cherry"]),
        );
        ctx.insert(
            "user".to_string(),
            serde_json::json!({"email": "alice@example.com", "id": 123}),
        );
        ctx
    }

    #[test]
    fn test_simple_variable() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Hello, {{ name }}!", &make_context()).unwrap();
        assert_eq!(result, "Hello, Alice!");
    }

    #[test]
    fn test_no_template() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Plain text", &make_context()).unwrap();
        assert_eq!(result, "Plain text");
    }

    #[test]
    fn test_nested_variable() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("Email: {{ user.email }}", &make_context())
            .unwrap();
        assert_eq!(result, "Email: alice@example.com");
    }

    #[test]
    fn test_b64encode_filter() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("{{ name | b64encode }}", &make_context())
            .unwrap();
        assert_eq!(result, "QWxpY2U=");
    }

    #[test]
    fn test_default_filter() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("{{ missing | default('fallback') }}", &make_context())
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_join_filter() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("{{ items | join(', ') }}", &make_context())
            .unwrap();
        assert_eq!(result, "apple, banana, cherry");
    }

    #[test]
    fn test_conditional_block() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("{% if active %}Active{% else %}Inactive{% endif %}", &make_context())
            .unwrap();
        assert_eq!(result, "Active");
    }

    #[test]
    fn test_evaluate_condition() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();

        assert!(renderer.evaluate_condition("age > 25", &ctx).unwrap());
        assert!(!renderer.evaluate_condition("age < 25", &ctx).unwrap());
        assert!(renderer.evaluate_condition("active", &ctx).unwrap());
        assert!(renderer
            .evaluate_condition("name == 'Alice'", &ctx)
            .unwrap());
    }

    #[test]
    fn test_evaluate_condition_undefined_reference_errors() {
        let renderer = TemplateRenderer::new();
        let result = renderer.evaluate_condition("no_such_var > 5", &make_context());
        assert!(matches!(result, Err(AppError::Template(_))));
    }

    #[test]
    fn test_render_to_value_number() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render_to_value("{{ age }}", &make_context()).unwrap();
        assert_eq!(result, serde_json::json!(30));
    }

    #[test]
    fn test_render_to_value_list() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render_to_value("{{ items }}", &make_context())
            .unwrap();
        assert_eq!(result, serde_json::json!(["apple", "banana", "cherry"]));
    }

    #[test]
    fn test_render_value_nested() {
        let renderer = TemplateRenderer::new();
        let value = serde_json::json!({
            "greeting": "Hello, {{ name }}!",
            "info": {
                "age_str": "Age: {{ age }}"
            }
        });

        let result = renderer.render_value(&value, &make_context()).unwrap();
        assert_eq!(result["greeting"], "Hello, Alice!");
        assert_eq!(result["info"]["age_str"], "Age: 30");
    }

}
