use crate::{engine::Tool, request::FailureKind};
use serde::{Deserialize, Serialize};

/// Per-request diagnostics; never part of the transport response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderReport {
    pub started: String,
    pub duration_ms: u64,
    pub passes_run: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bibliography: Option<BibliographyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<Tool>,
    pub cropped: bool,
    pub image_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BibliographyReport {
    /// `None` when entries were given but no processor is installed.
    pub processor: Option<Tool>,
    pub ok: bool,
    /// Typesetting was redone without the bibliography.
    pub dropped: bool,
}
