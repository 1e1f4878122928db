//! Document head state collected while a component renders.

use serde::{Deserialize, Serialize};

/// Kind of a head entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadKind {
    HtmlAttributes,
    BodyAttributes,
    Title,
    Base,
    Meta,
    Link,
    Style,
    Script,
    Noscript,
}

impl HeadKind {
    /// Classify a head element by its tag name.
    ///
    /// Returns the kind together with the content to store: the whole element
    /// for regular tags, only the attribute list for `<html>` and `<body>`.
    pub fn classify(element: &str) -> Option<(Self, &str)> {
        let rest = element.trim().strip_prefix('<')?;
        let name_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let name = rest[..name_len].to_ascii_lowercase();

        let kind = match name.as_str() {
            "html" => Self::HtmlAttributes,
            "body" => Self::BodyAttributes,
            "title" => Self::Title,
            "base" => Self::Base,
            "meta" => Self::Meta,
            "link" => Self::Link,
            "style" => Self::Style,
            "script" => Self::Script,
            "noscript" => Self::Noscript,
            _ => return None,
        };

        match kind {
            Self::HtmlAttributes | Self::BodyAttributes => {
                let attributes = rest[name_len..].trim_end().strip_suffix('>')?;
                Some((kind, attributes.trim_end_matches('/').trim()))
            }
            _ => Some((kind, element.trim())),
        }
    }
}

/// Head state accumulated during a single render.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Head {
    pub html_attributes: Vec<String>,
    pub body_attributes: Vec<String>,
    pub title: Option<String>,
    pub base: Option<String>,
    pub meta: Vec<String>,
    pub link: Vec<String>,
    pub style: Vec<String>,
    pub script: Vec<String>,
    pub noscript: Vec<String>,
}

impl Head {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry. Title and base are single-valued; the last one wins.
    pub fn push(&mut self, kind: HeadKind, content: String) {
        if content.is_empty() {
            return;
        }
        match kind {
            HeadKind::HtmlAttributes => self.html_attributes.push(content),
            HeadKind::BodyAttributes => self.body_attributes.push(content),
            HeadKind::Title => self.title = Some(content),
            HeadKind::Base => self.base = Some(content),
            HeadKind::Meta => self.meta.push(content),
            HeadKind::Link => self.link.push(content),
            HeadKind::Style => self.style.push(content),
            HeadKind::Script => self.script.push(content),
            HeadKind::Noscript => self.noscript.push(content),
        }
    }

    /// Opening `<html>` tag including collected attributes.
    pub fn html_open_tag(&self) -> String {
        open_tag("html", &self.html_attributes)
    }

    /// Opening `<body>` tag including collected attributes.
    pub fn body_open_tag(&self) -> String {
        open_tag("body", &self.body_attributes)
    }
}

fn open_tag(name: &str, attributes: &[String]) -> String {
    if attributes.is_empty() {
        format!("<{}>", name)
    } else {
        format!("<{} {}>", name, attributes.join(" "))
    }
}
