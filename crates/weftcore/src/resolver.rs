//! Placeholder resolution.
//!
//! Four reference forms are understood:
//!
//! - `{{#env.NAME#}}` reads the environment scope
//! - `{{user.var.NAME}}` (or `{{#user.var.NAME#}}`) reads the user scope;
//!   `sys.NAME` is an alias into the same scope
//! - `{{vertex_id.field}}` (or `{{#vertex_id.field#}}`) reads an upstream
//!   vertex output, optionally descending into `field.sub.0`
//! - `{{ name }}` reads a value bound to the vertex itself (edge ports,
//!   port defaults, template variables, loop variables)

use crate::{Context, ResolveError, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*#?\s*([A-Za-z0-9_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*#?\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Env { name: String, path: Vec<String> },
    User { name: String, path: Vec<String> },
    Output { vertex: String, field: String, path: Vec<String> },
    Bound { name: String, path: Vec<String> },
}

impl Reference {
    /// Parse the inside of a placeholder (`env.topic`, `llm.text`, `count`),
    /// or a full placeholder token.
    pub fn parse(raw: &str) -> Result<Reference, ResolveError> {
        let inner = match PLACEHOLDER.captures(raw.trim()) {
            Some(caps) if caps.get(0).map(|m| m.as_str()) == Some(raw.trim()) => {
                caps.get(1).map(|m| m.as_str()).unwrap_or_default()
            }
            _ => raw.trim(),
        };
        if inner.is_empty() {
            return Err(ResolveError::Malformed(raw.to_string()));
        }
        let segments: Vec<&str> = inner.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ResolveError::Malformed(raw.to_string()));
        }
        let rest = |from: usize| segments[from.min(segments.len())..].iter().map(|s| s.to_string()).collect();

        let reference = match segments.as_slice() {
            [single] => Reference::Bound {
                name: single.to_string(),
                path: Vec::new(),
            },
            ["env", name, ..] => Reference::Env {
                name: name.to_string(),
                path: rest(2),
            },
            ["user", "var", name, ..] => Reference::User {
                name: name.to_string(),
                path: rest(3),
            },
            ["user", name, ..] | ["sys", name, ..] | ["conversation", name, ..] => Reference::User {
                name: name.to_string(),
                path: rest(2),
            },
            [vertex, field, ..] => Reference::Output {
                vertex: vertex.to_string(),
                field: field.to_string(),
                path: rest(2),
            },
            [] => return Err(ResolveError::Malformed(raw.to_string())),
        };
        Ok(reference)
    }

    /// Vertex id of an upstream reference.
    pub fn vertex(&self) -> Option<&str> {
        match self {
            Reference::Output { vertex, .. } => Some(vertex),
            _ => None,
        }
    }

    /// Canonical placeholder token for this reference.
    pub fn to_placeholder(&self) -> String {
        let join = |head: String, path: &[String]| {
            if path.is_empty() {
                head
            } else {
                format!("{}.{}", head, path.join("."))
            }
        };
        match self {
            Reference::Env { name, path } => format!("{{{{#{}#}}}}", join(format!("env.{}", name), path)),
            Reference::User { name, path } => format!("{{{{{}}}}}", join(format!("user.var.{}", name), path)),
            Reference::Output { vertex, field, path } => {
                format!("{{{{#{}#}}}}", join(format!("{}.{}", vertex, field), path))
            }
            Reference::Bound { name, path } => format!("{{{{ {} }}}}", join(name.clone(), path)),
        }
    }
}

/// Convert a selector (`["llm", "text"]`) into the equivalent placeholder.
pub fn selector_to_template(selector: &[String]) -> String {
    format!("{{{{#{}#}}}}", selector.join("."))
}

/// True when the text contains at least one placeholder.
pub fn has_placeholders(template: &str) -> bool {
    PLACEHOLDER.is_match(template)
}

/// All references mentioned by a template, in order of appearance.
pub fn references(template: &str) -> Result<Vec<Reference>, ResolveError> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| Reference::parse(caps.get(1).map(|m| m.as_str()).unwrap_or_default()))
        .collect()
}

/// Reads references against a context snapshot plus the vertex's own bindings.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    context: &'a Context,
    bindings: Option<&'a HashMap<String, Value>>,
}

impl<'a> Resolver<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            bindings: None,
        }
    }

    pub fn with_bindings(mut self, bindings: &'a HashMap<String, Value>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn lookup(&self, reference: &Reference) -> Result<Value, ResolveError> {
        let descend = |value: &Value, path: &[String]| {
            value
                .get_path(path.iter().map(String::as_str))
                .cloned()
                .unwrap_or(Value::Null)
        };
        match reference {
            Reference::Env { name, path } => self
                .context
                .env(name)
                .map(|v| descend(v, path))
                .ok_or_else(|| ResolveError::MissingVariable {
                    scope: "environment".to_string(),
                    name: name.clone(),
                }),
            Reference::User { name, path } => self
                .context
                .user(name)
                .map(|v| descend(v, path))
                .ok_or_else(|| ResolveError::MissingVariable {
                    scope: "user".to_string(),
                    name: name.clone(),
                }),
            Reference::Output { vertex, field, path } => self
                .context
                .output(vertex)
                .and_then(|outputs| outputs.get(field))
                .map(|v| descend(v, path))
                .or_else(|| self.context.is_skipped(vertex).then_some(Value::Null))
                .ok_or_else(|| ResolveError::MissingReference {
                    vertex: vertex.clone(),
                    field: field.clone(),
                }),
            Reference::Bound { name, path } => self
                .bindings
                .and_then(|b| b.get(name))
                .map(|v| descend(v, path))
                .ok_or_else(|| ResolveError::MissingVariable {
                    scope: "input".to_string(),
                    name: name.clone(),
                }),
        }
    }

    /// Resolve a template. A template that is exactly one placeholder yields
    /// the referenced value unchanged; anything else renders to text.
    pub fn resolve(&self, template: &str) -> Result<Value, ResolveError> {
        if let Some(caps) = PLACEHOLDER.captures(template) {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            if whole.len() == template.len() {
                let reference = Reference::parse(caps.get(1).map(|m| m.as_str()).unwrap_or_default())?;
                return self.lookup(&reference);
            }
        }
        self.render(template).map(Value::String)
    }

    /// Render a template to text, substituting every placeholder.
    pub fn render(&self, template: &str) -> Result<String, ResolveError> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let reference = Reference::parse(caps.get(1).map(|m| m.as_str()).unwrap_or_default())?;
            rendered.push_str(&template[last..whole.start()]);
            rendered.push_str(&self.lookup(&reference)?.to_text());
            last = whole.end();
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// Resolve a literal value: strings are treated as templates, structures
    /// are resolved element by element, everything else passes through.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, ResolveError> {
        match value {
            Value::String(s) if has_placeholders(s) => self.resolve(s),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                .collect::<Result<_, ResolveError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }
}
