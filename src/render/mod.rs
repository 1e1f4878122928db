//! Render dispatch: components, the bundle registry and document assembly.

pub mod head;
pub mod registry;
pub mod template;

use serde_json::Value;

use crate::error::Result;
pub use head::Head;
pub use registry::{CachePolicy, FileLoader, Registry};
pub use template::CompiledTemplate;

/// Name of the meta tag carrying the serialized props.
pub const PROPS_META_NAME: &str = "__ssr_props__";

/// Id of the element the rendered body is placed in.
pub const ROOT_ELEMENT_ID: &str = "__ssr_root__";

/// A render capability: turns props into body markup, recording head state.
pub trait Component: Send + Sync {
    fn render(&self, props: &Value, head: &mut Head) -> Result<String>;
}

/// Assets referenced by a render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRef {
    /// Registry locator of the component.
    pub locator: String,
    /// Client script URL.
    pub script: String,
    /// Stylesheet URL; no link is emitted when absent or empty.
    pub stylesheet: Option<String>,
}

/// Render `component` into a complete HTML document.
///
/// The props are embedded once, percent-encoded, in a meta tag so the client
/// script can pick them up for rehydration.
pub fn render_document(
    component: &dyn Component,
    bundle: &BundleRef,
    props: &Value,
) -> Result<String> {
    let mut head = Head::new();
    let body = component.render(props, &mut head)?;
    let encoded_props = urlencoding::encode(&serde_json::to_string(props)?).into_owned();

    let mut doc = String::with_capacity(body.len() + 512);
    doc.push_str("<!DOCTYPE html>");
    doc.push_str(&head.html_open_tag());
    doc.push_str("<head>");
    doc.push_str(r#"<meta charset="utf-8">"#);
    doc.push_str(r#"<meta name="viewport" content="width=device-width, initial-scale=1.0">"#);
    if let Some(ref title) = head.title {
        doc.push_str(title);
    }
    if let Some(ref base) = head.base {
        doc.push_str(base);
    }
    doc.push_str(&format!(
        r#"<meta name="{}" content="{}">"#,
        PROPS_META_NAME, encoded_props
    ));
    for entry in head.meta.iter().chain(&head.link).chain(&head.style) {
        doc.push_str(entry);
    }
    if let Some(stylesheet) = bundle.stylesheet.as_deref().filter(|s| !s.is_empty()) {
        doc.push_str(&format!(
            r#"<link href="{}" rel="stylesheet">"#,
            template::escape_html(stylesheet)
        ));
    }
    doc.push_str("</head>");
    doc.push_str(&head.body_open_tag());
    for entry in &head.noscript {
        doc.push_str(entry);
    }
    doc.push_str(&format!(r#"<div id="{}">"#, ROOT_ELEMENT_ID));
    doc.push_str(&body);
    doc.push_str("</div>");
    for entry in &head.script {
        doc.push_str(entry);
    }
    doc.push_str(&format!(
        r#"<script src="{}"></script>"#,
        template::escape_html(&bundle.script)
    ));
    doc.push_str("</body></html>");

    Ok(doc)
}
