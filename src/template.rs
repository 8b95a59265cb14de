//! Template interpolation for source definitions
//!
//! Handles `{{ path }}` interpolation in query variables, headers and auth
//! settings. Roots are `config` (the secrets file), `window` (the time range
//! being extracted), `watermark` and `resource`.

use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Regex for matching template variables: {{ variable.path }}
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)*)\s*\}\}")
        .expect("template pattern is a valid regex")
});

/// Values available to templates
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Secrets and per-source settings
    pub config: Value,
    /// Window being extracted: `start`, `end`
    pub window: Value,
    /// Stored watermark for the resource
    pub watermark: Value,
    /// Resource settings: `name`, `page_size`
    pub resource: Value,
}

impl TemplateContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context holding secrets
    pub fn with_config(config: Value) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Set the window values
    pub fn set_window(&mut self, window: Value) -> &mut Self {
        self.window = window;
        self
    }

    /// Set the watermark value
    pub fn set_watermark(&mut self, watermark: Value) -> &mut Self {
        self.watermark = watermark;
        self
    }

    /// Set the resource values
    pub fn set_resource(&mut self, resource: Value) -> &mut Self {
        self.resource = resource;
        self
    }

    /// Look up a dotted path (e.g. `config.shop_domain`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let root = match parts.next()? {
            "config" => &self.config,
            "window" => &self.window,
            "watermark" => &self.watermark,
            "resource" => &self.resource,
            _ => return None,
        };

        let mut current = root;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

/// Render a template string
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = TEMPLATE_REGEX.replace_all(template, |cap: &regex::Captures<'_>| {
        match ctx.get(&cap[1]) {
            Some(value) => value_to_string(value),
            None => {
                missing.push(cap[1].to_string());
                cap[0].to_string()
            }
        }
    });

    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(Error::undefined_var(missing.join(", ")))
    }
}

/// Check if a string contains template variables
pub fn has_templates(s: &str) -> bool {
    TEMPLATE_REGEX.is_match(s)
}

/// Convert a JSON value to a string for template substitution
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Render every string inside a JSON value
///
/// A string that is exactly one template takes the referenced value with
/// its JSON type, so `"{{ resource.page_size }}"` renders as a number.
pub fn render_value(value: &Value, ctx: &TemplateContext) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(whole) = sole_variable(s) {
                return ctx
                    .get(whole)
                    .cloned()
                    .ok_or_else(|| Error::undefined_var(whole));
            }
            if has_templates(s) {
                Ok(Value::String(render(s, ctx)?))
            } else {
                Ok(value.clone())
            }
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(v, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => Ok(value.clone()),
    }
}

/// The variable path when `s` consists of a single template and nothing else
fn sole_variable(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let cap = TEMPLATE_REGEX.captures(trimmed)?;
    if cap.get(0)?.as_str().len() != trimmed.len() {
        return None;
    }
    cap.get(1).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_substitution() {
        let ctx = TemplateContext::with_config(json!({"access_token": "shpat_123"}));

        let result = render("token {{ config.access_token }}", &ctx).unwrap();
        assert_eq!(result, "token shpat_123");
    }

    #[test]
    fn test_multiple_substitutions() {
        let ctx = TemplateContext::with_config(json!({
            "shop_domain": "acme.myshopify.com",
            "api_version": "2024-04"
        }));

        let result = render(
            "https://{{ config.shop_domain }}/admin/api/{{ config.api_version }}/graphql.json",
            &ctx,
        )
        .unwrap();
        assert_eq!(result, "https://acme.myshopify.com/admin/api/2024-04/graphql.json");
    }

    #[test]
    fn test_window_context() {
        let mut ctx = TemplateContext::new();
        ctx.set_window(json!({"start": "2024-01-01T00:00:00Z", "end": "2024-01-31T00:00:00Z"}));

        let result = render(
            "updated_at:>='{{ window.start }}' AND updated_at:<'{{ window.end }}'",
            &ctx,
        )
        .unwrap();
        assert_eq!(
            result,
            "updated_at:>='2024-01-01T00:00:00Z' AND updated_at:<'2024-01-31T00:00:00Z'"
        );
    }

    #[test]
    fn test_undefined_variable() {
        let ctx = TemplateContext::new();
        let err = render("{{ config.missing }} {{ window.start }}", &ctx).unwrap_err();
        assert!(err.to_string().contains("config.missing, window.start"));
    }

    #[test]
    fn test_unknown_root_is_undefined() {
        let ctx = TemplateContext::with_config(json!({"key": "v"}));
        assert!(render("{{ key }}", &ctx).is_err());
    }

    #[test]
    fn test_has_templates() {
        assert!(has_templates("{{ config.key }}"));
        assert!(has_templates("prefix {{ var }} suffix"));
        assert!(!has_templates("no templates here"));
        assert!(!has_templates("{ not a template }"));
    }

    #[test]
    fn test_render_value_keeps_types_of_whole_templates() {
        let mut ctx = TemplateContext::new();
        ctx.set_resource(json!({"name": "orders", "page_size": 50}));
        ctx.set_window(json!({"start": "2024-01-01T00:00:00Z"}));

        let input = json!({
            "first": "{{ resource.page_size }}",
            "filter": {"from": "{{ window.start }}", "label": "page of {{ resource.page_size }}"},
            "tags": ["{{ resource.name }}", 3]
        });

        let result = render_value(&input, &ctx).unwrap();
        assert_eq!(
            result,
            json!({
                "first": 50,
                "filter": {"from": "2024-01-01T00:00:00Z", "label": "page of 50"},
                "tags": ["orders", 3]
            })
        );
    }

    #[test]
    fn test_whitespace_in_template() {
        let ctx = TemplateContext::with_config(json!({"key": "value"}));

        assert_eq!(render("{{config.key}}", &ctx).unwrap(), "value");
        assert_eq!(render("{{ config.key }}", &ctx).unwrap(), "value");
        assert_eq!(render("{{  config.key  }}", &ctx).unwrap(), "value");
    }
}
