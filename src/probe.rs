use crate::engine::{Tool, Toolchain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAvailability {
    /// The engine plus at least one image converter are present.
    pub ready: bool,
    /// Keyed by the names front ends already poll for, see [`readiness_key`].
    pub tools: BTreeMap<String, bool>,
}

impl ToolAvailability {
    pub fn has(&self, tool: Tool) -> bool {
        self.tools.get(readiness_key(tool)).copied().unwrap_or(false)
    }
}

/// `pdflatex` for the engine; `convert` covers both ImageMagick entry points.
pub fn readiness_key(tool: Tool) -> &'static str {
    match tool {
        Tool::Latex => "pdflatex",
        Tool::Magick | Tool::Convert => "convert",
        other => other.name(),
    }
}

/// Existence check for every tool; nothing is executed.
pub fn check_readiness<T: Toolchain + ?Sized>(toolchain: &T) -> ToolAvailability {
    let mut tools: BTreeMap<String, bool> = BTreeMap::new();
    for tool in Tool::ALL {
        let present = toolchain.locate(tool).is_some();
        *tools.entry(readiness_key(tool).to_string()).or_default() |= present;
    }

    let present = |key: &str| tools.get(key).copied().unwrap_or(false);
    let ready = present(readiness_key(Tool::Latex))
        && (present(readiness_key(Tool::Pdftoppm)) || present(readiness_key(Tool::Convert)));

    ToolAvailability { ready, tools }
}
