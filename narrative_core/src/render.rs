//! Rendering seam. String templating belongs to an outside renderer; the core
//! only hands it a template and a scope and treats the result as opaque text.

use serde_json::Value;

use story_graph::Scope;

/// Rendering failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("no binding for placeholder '{0}'")]
    MissingKey(String),

    #[error("unclosed placeholder starting at byte {0}")]
    Unclosed(usize),
}

/// Renders a node's `content_template` against the assembled namespace.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, scope: &dyn Scope) -> Result<String, RenderError>;
}

/// Minimal `{key}` substitution renderer.
///
/// - `{name}` and `{a.b.c}` are looked up through [`Scope::resolve`]
/// - objects render their `label` field, so a bound provider renders as its name
/// - `{{` and `}}` produce literal braces
/// - unknown keys are left in place unless `strict` is set
#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer {
    pub strict: bool,
}

impl PlaceholderRenderer {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

impl Renderer for PlaceholderRenderer {
    fn render(&self, template: &str, scope: &dyn Scope) -> Result<String, RenderError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                out.push_str(&tail[..1]);
                rest = &tail[2..];
                offset += pos + 2;
                continue;
            }
            if tail.starts_with('}') {
                out.push('}');
                rest = &tail[1..];
                offset += pos + 1;
                continue;
            }

            let close = tail.find('}').ok_or(RenderError::Unclosed(offset + pos))?;
            let key = tail[1..close].trim();
            match scope.resolve(key) {
                Some(value) => out.push_str(&display_value(value)),
                None if self.strict => return Err(RenderError::MissingKey(key.to_string())),
                None => out.push_str(&tail[..=close]),
            }
            rest = &tail[close + 1..];
            offset += pos + close + 1;
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Text form of a namespace value.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("label") {
            Some(Value::String(label)) => label.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
