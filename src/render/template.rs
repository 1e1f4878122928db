//! Component templates, the built-in render capability.
//!
//! A template is HTML with `{{ dotted.path }}` placeholders resolved against
//! the request props. An optional head block at the top contributes
//! out-of-band head state, one element per line:
//!
//! ```text
//! <!--head-->
//! <html lang="en">
//! <title>{{ title }}</title>
//! <meta name="description" content="{{ summary }}">
//! <!--/head-->
//! <h1>{{ title }}</h1>
//! ```
//!
//! The bundler compiles templates into [`CompiledTemplate`] values and stores
//! them as JSON; workers load those.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Component;
use super::head::{Head, HeadKind};
use crate::error::{Result, SsrError};

const HEAD_OPEN: &str = "<!--head-->";
const HEAD_CLOSE: &str = "<!--/head-->";

/// A piece of template text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Var(String),
}

/// A head element with its own placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadEntry {
    pub kind: HeadKind,
    pub segments: Vec<Segment>,
}

/// A template parsed into segments, ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    /// Source name, for diagnostics.
    pub name: String,
    pub head: Vec<HeadEntry>,
    pub body: Vec<Segment>,
}

impl CompiledTemplate {
    /// Parse template source.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let error = |message: String| SsrError::Template {
            source_name: name.clone(),
            message,
        };

        let trimmed = source.trim_start();
        let (head_block, body) = match trimmed.strip_prefix(HEAD_OPEN) {
            Some(rest) => {
                let end = rest
                    .find(HEAD_CLOSE)
                    .ok_or_else(|| error(format!("missing {}", HEAD_CLOSE)))?;
                (&rest[..end], rest[end + HEAD_CLOSE.len()..].trim_start())
            }
            None => ("", source),
        };

        let mut head = Vec::new();
        for line in head_block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (kind, content) = HeadKind::classify(line)
                .ok_or_else(|| error(format!("unsupported head element: {}", line)))?;
            head.push(HeadEntry {
                kind,
                segments: parse_segments(content).map_err(&error)?,
            });
        }

        let body = parse_segments(body).map_err(&error)?;
        Ok(Self { name, head, body })
    }
}

impl Component for CompiledTemplate {
    fn render(&self, props: &Value, head: &mut Head) -> Result<String> {
        for entry in &self.head {
            head.push(entry.kind, interpolate(&entry.segments, props));
        }
        Ok(interpolate(&self.body, props))
    }
}

/// Split text into literal and placeholder segments.
fn parse_segments(source: &str) -> std::result::Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| "unterminated placeholder".to_string())?;
        let path = after[..end].trim();
        if path.is_empty() {
            return Err("empty placeholder".to_string());
        }
        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(format!("invalid placeholder '{}'", path));
        }
        segments.push(Segment::Var(path.to_string()));
        rest = &after[end + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

fn interpolate(segments: &[Segment], props: &Value) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Var(path) => {
                if let Some(value) = lookup(props, path) {
                    out.push_str(&escape_html(&display_value(value)));
                }
            }
        }
    }
    out
}

/// Resolve a dotted path; numeric parts index into arrays.
fn lookup<'a>(props: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(props, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Escape text for use in HTML content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
