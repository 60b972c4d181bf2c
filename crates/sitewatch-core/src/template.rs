use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::align::RowTuple;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unterminated placeholder in {0:?}")]
    Unterminated(String),
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),
    #[error("Cannot resolve URL {value:?}: {reason}")]
    Url { value: String, reason: String },
}

pub type RenderResult<T> = Result<T, RenderError>;

pub type Scope = Map<String, Value>;

pub trait Renderer: Send + Sync {
    fn render(&self, expression: &str, scope: &Scope) -> RenderResult<Value>;

    /// Renders every string inside `value`, descending into arrays and objects.
    fn render_value(&self, value: &Value, scope: &Scope) -> RenderResult<Value> {
        match value {
            Value::String(expression) => self.render(expression, scope),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_value(item, scope))
                .collect::<RenderResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_value(item, scope)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Substitutes `{{ path | filter }}` placeholders from the scope.
///
/// An expression consisting of exactly one placeholder evaluates to the
/// referenced value itself, so numbers, arrays and objects keep their shape.
/// Anything else renders to a string. Supported filters are `strip`,
/// `downcase`, `upcase`, `to_uri` and `default: "fallback"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn evaluate(placeholder: &str, scope: &Scope) -> RenderResult<Value> {
        let mut parts = split_pipes(placeholder).into_iter();
        let head = parts.next().unwrap_or_default();
        let mut value = lookup(head.trim(), scope);

        for filter in parts {
            value = apply_filter(filter.trim(), value, scope)?;
        }
        Ok(value)
    }
}

impl Renderer for PlaceholderRenderer {
    fn render(&self, expression: &str, scope: &Scope) -> RenderResult<Value> {
        let trimmed = expression.trim();
        if let Some(inner) = trimmed
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
        {
            if !inner.contains("{{") && !inner.contains("}}") {
                return Self::evaluate(inner, scope);
            }
        }

        let mut out = String::with_capacity(expression.len());
        let mut rest = expression;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| RenderError::Unterminated(expression.to_string()))?;
            out.push_str(&to_text(&Self::evaluate(&after[..end], scope)?));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }
}

/// Splits on `|` outside of quoted filter arguments.
fn split_pipes(placeholder: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in placeholder.char_indices() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            ('|', None) => {
                parts.push(&placeholder[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&placeholder[start..]);
    parts
}

fn lookup(path: &str, scope: &Scope) -> Value {
    if let Some(literal) = unquote(path) {
        return Value::String(literal.to_string());
    }

    let normalized = path.replace('[', ".").replace(']', "");
    let mut segments = normalized.split('.').filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return Value::Null;
    };

    let mut current = match scope.get(first) {
        Some(value) => value,
        None => return Value::Null,
    };
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    ['"', '\''].into_iter().find_map(|q| {
        text.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

fn apply_filter(filter: &str, value: Value, scope: &Scope) -> RenderResult<Value> {
    let (name, argument) = match filter.split_once(':') {
        Some((name, argument)) => (name.trim(), Some(argument.trim())),
        None => (filter, None),
    };

    match name {
        "strip" => Ok(Value::String(to_text(&value).trim().to_string())),
        "downcase" => Ok(Value::String(to_text(&value).to_lowercase())),
        "upcase" => Ok(Value::String(to_text(&value).to_uppercase())),
        "default" => {
            if is_blank(&value) {
                Ok(argument.map_or(Value::Null, |arg| {
                    unquote(arg).map_or_else(|| lookup(arg, scope), |s| Value::String(s.to_string()))
                }))
            } else {
                Ok(value)
            }
        }
        "to_uri" => to_uri(&value, scope),
        other => Err(RenderError::UnknownFilter(other.to_string())),
    }
}

fn to_uri(value: &Value, scope: &Scope) -> RenderResult<Value> {
    let text = to_text(value);
    let text = text.trim();
    let base = scope.get("url").and_then(Value::as_str).and_then(|u| Url::parse(u).ok());

    let resolved = match base {
        Some(base) => base.join(text),
        None => Url::parse(text),
    }
    .map_err(|e| RenderError::Url {
        value: text.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Value::String(resolved.to_string()))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Text form used when a value is interpolated into a larger string.
#[must_use]
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values available to templates besides the row's own fields.
#[derive(Debug, Clone, Default)]
pub struct Ambient {
    pub url: Option<String>,
    pub response: Option<Value>,
    pub incoming: Option<Map<String, Value>>,
}

impl Ambient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn with_incoming(mut self, incoming: Map<String, Value>) -> Self {
        self.incoming = Some(incoming);
        self
    }

    /// Layers, lowest precedence first: incoming payload, ambient values,
    /// then the row itself.
    #[must_use]
    pub fn scope_for(&self, row: &RowTuple) -> Scope {
        let mut scope = self.incoming.clone().unwrap_or_default();
        if let Some(url) = &self.url {
            scope.insert("url".to_string(), Value::String(url.clone()));
        }
        if let Some(response) = &self.response {
            scope.insert("_response_".to_string(), response.clone());
        }
        for (key, value) in row {
            scope.insert(key.clone(), value.clone());
        }
        scope
    }
}

/// Applies the configured template to each row tuple.
#[derive(Debug, Clone, Default)]
pub struct TemplateMerger {
    template: Map<String, Value>,
}

impl TemplateMerger {
    #[must_use]
    pub const fn new(template: Map<String, Value>) -> Self {
        Self { template }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// The row without hidden fields, with each rendered template key
    /// replacing an existing field in place or appended after the others.
    pub fn merge(
        &self,
        renderer: &dyn Renderer,
        row: &RowTuple,
        hidden: &[String],
        ambient: &Ambient,
    ) -> RenderResult<Map<String, Value>> {
        let mut payload: Map<String, Value> = row
            .iter()
            .filter(|(key, _)| !hidden.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if self.template.is_empty() {
            return Ok(payload);
        }

        let scope = ambient.scope_for(row);
        for (key, expression) in &self.template {
            payload.insert(key.clone(), renderer.render_value(expression, &scope)?);
        }
        Ok(payload)
    }
}
