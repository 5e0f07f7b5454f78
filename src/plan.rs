use crate::{
    config::Config,
    engine::{Tool, Toolchain},
    error::RenderError,
    request::{BibBackend, CompileRequest},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where each installed tool lives, looked up once per request.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTools {
    paths: BTreeMap<Tool, PathBuf>,
}

impl ResolvedTools {
    pub fn resolve<T: Toolchain + ?Sized>(toolchain: &T) -> Self {
        let paths = Tool::ALL
            .into_iter()
            .filter_map(|tool| toolchain.locate(tool).map(|p| (tool, p)))
            .collect();
        Self { paths }
    }

    pub fn path(&self, tool: Tool) -> Option<&Path> {
        self.paths.get(&tool).map(PathBuf::as_path)
    }

    pub fn has(&self, tool: Tool) -> bool {
        self.paths.contains_key(&tool)
    }

    pub fn require(&self, tool: Tool) -> Result<&Path, RenderError> {
        self.path(tool).ok_or_else(|| RenderError::ToolMissing {
            tool: tool.name().to_string(),
        })
    }
}

impl FromIterator<(Tool, PathBuf)> for ResolvedTools {
    fn from_iter<I: IntoIterator<Item = (Tool, PathBuf)>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassPlan {
    pub passes: u32,
    /// Processor to run after the first pass.
    pub bibliography: Option<Tool>,
    /// Entries were supplied but their processor is not installed.
    pub bibliography_unavailable: bool,
    /// Tried in order until one produces an image.
    pub converters: Vec<Tool>,
    pub crop: bool,
    pub trim_with: Option<Tool>,
}

impl PassPlan {
    pub fn new(cfg: &Config, req: &CompileRequest, tools: &ResolvedTools) -> Result<Self, RenderError> {
        if req.passes == 0 {
            return Err(RenderError::validation("passes must be at least 1"));
        }
        tools.require(Tool::Latex)?;

        let converters = converter_order(cfg, tools);
        if converters.is_empty() {
            return Err(RenderError::ToolMissing {
                tool: "pdftoppm or ImageMagick (magick/convert)".to_string(),
            });
        }

        let max_passes = cfg.limits.max_passes.max(1);
        let mut passes = req.passes.clamp(1, max_passes);

        let mut bibliography = None;
        let mut bibliography_unavailable = false;
        if req.bibliography().is_some() {
            let processor = bibliography_processor(req.bib_backend());
            if tools.has(processor) {
                bibliography = Some(processor);
                // The .bbl is only read on a later pass.
                passes = passes.max(2).min(max_passes);
            } else {
                bibliography_unavailable = true;
            }
        }

        let trim_with = if cfg.render.trim {
            first_imagemagick(tools)
        } else {
            None
        };

        Ok(Self {
            passes,
            bibliography,
            bibliography_unavailable,
            converters,
            crop: cfg.render.crop && tools.has(Tool::Pdfcrop),
            trim_with,
        })
    }
}

pub fn bibliography_processor(backend: BibBackend) -> Tool {
    match backend {
        BibBackend::Bibtex => Tool::Bibtex,
        BibBackend::Biber => Tool::Biber,
    }
}

fn converter_order(cfg: &Config, tools: &ResolvedTools) -> Vec<Tool> {
    let imagemagick = first_imagemagick(tools);
    let pdftoppm = tools.has(Tool::Pdftoppm).then_some(Tool::Pdftoppm);

    let ordered = if cfg.render.prefer_pdftoppm {
        [pdftoppm, imagemagick]
    } else {
        [imagemagick, pdftoppm]
    };
    ordered.into_iter().flatten().collect()
}

/// `magick` when installed, else the legacy `convert`.
fn first_imagemagick(tools: &ResolvedTools) -> Option<Tool> {
    Tool::ALL
        .into_iter()
        .find(|t| t.is_imagemagick() && tools.has(*t))
}
