//! Request and response types of the worker endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SsrError};
use crate::render::BundleRef;

/// Query parameters of `GET /render`.
///
/// Every field is optional at the extractor level so that missing parameters
/// surface as render failures (500) rather than extractor rejections.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RenderParams {
    /// Bundle locator.
    pub bundle: Option<String>,
    /// Client script URL.
    pub script: Option<String>,
    /// Stylesheet URL.
    pub stylesheet: Option<String>,
    /// JSON-encoded props; missing means `null`.
    pub props: Option<String>,
}

impl RenderParams {
    /// Validate the parameters into a bundle reference and parsed props.
    pub fn into_request(self) -> Result<(BundleRef, Value)> {
        let locator = self
            .bundle
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SsrError::Render("missing required parameter 'bundle'".into()))?;
        let script = self
            .script
            .ok_or_else(|| SsrError::Render("missing required parameter 'script'".into()))?;
        let props = match self.props {
            Some(ref raw) => serde_json::from_str(raw).map_err(SsrError::InvalidProps)?,
            None => Value::Null,
        };

        Ok((
            BundleRef {
                locator,
                script,
                stylesheet: self.stylesheet,
            },
            props,
        ))
    }
}

/// Query parameters of a handoff request.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HandoffParams {
    /// New host pid, as text so malformed values can be reported.
    pub pid: Option<String>,
}

/// Worker warm-up state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Warming,
    Ready,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Pool index, when supervised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Worker process id.
    pub pid: u32,
    /// Host pid currently linked to.
    pub host_pid: i32,
}
