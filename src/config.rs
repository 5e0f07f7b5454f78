use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub toolchain: Toolchain,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub document: Document,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub log_filter: LogFilter,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Loads `path` when given, otherwise falls back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Directory under which per-request workspaces are created.
    pub fn workspace_root(&self) -> PathBuf {
        if self.paths.work_dir.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.paths.work_dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    /// Empty means the system temp directory.
    pub work_dir: String,
    pub workspace_prefix: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            work_dir: "".into(),
            workspace_prefix: "latex-snap-".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub total_timeout_seconds: u64,
    pub step_timeout_seconds: u64,
    pub max_passes: u32,
    pub max_body_bytes: usize,
    pub max_log_bytes: usize,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            total_timeout_seconds: 30,
            step_timeout_seconds: 30,
            max_passes: 3,
            max_body_bytes: 256 * 1024,
            max_log_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    pub latex: String,
    pub bibtex: String,
    pub biber: String,
    pub pdftoppm: String,
    pub magick: String,
    pub convert: String,
    pub pdfcrop: String,
    /// Extra environment passed to every tool.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Toolchain {
    fn default() -> Self {
        Self {
            latex: "pdflatex".into(),
            bibtex: "bibtex".into(),
            biber: "biber".into(),
            pdftoppm: "pdftoppm".into(),
            magick: "magick".into(),
            convert: "convert".into(),
            pdfcrop: "pdfcrop".into(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Render {
    pub dpi: u32,
    pub crop: bool,
    pub crop_margin_bp: u32,
    pub trim: bool,
    pub prefer_pdftoppm: bool,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            dpi: 300,
            crop: true,
            crop_margin_bp: 3,
            trim: true,
            prefer_pdftoppm: true,
        }
    }
}

pub const BASE_PREAMBLE: &str = r"\documentclass[11pt]{article}
\usepackage[margin=0.5in]{geometry}
\usepackage{amsmath,amsfonts,amssymb}
\usepackage{siunitx}
\usepackage{booktabs}
\usepackage{graphicx}
\usepackage{float}
\usepackage[hidelinks]{hyperref}
\usepackage{microtype}
";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub base_preamble: String,
    pub biblatex_style: String,
}
impl Default for Document {
    fn default() -> Self {
        Self {
            base_preamble: BASE_PREAMBLE.into(),
            biblatex_style: "numeric".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    /// Sets kpathsea `openin_any`/`openout_any` to paranoid mode.
    pub paranoid_file_access: bool,
    pub disable_shell_escape: bool,
    pub reject_document_environment: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            paranoid_file_access: true,
            disable_shell_escape: true,
            reject_document_environment: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    pub warning_patterns: Vec<String>,
    /// How many lines after a `!` error to search for the `l.<n>` context.
    pub context_lines: usize,
}
impl Default for LogFilter {
    fn default() -> Self {
        Self {
            warning_patterns: vec![
                r"^(LaTeX|Package|Class)\b.*\bWarning\b".into(),
                r"^(Overfull|Underfull) \\[hv]box".into(),
                r"^pdfTeX warning".into(),
                r"^\([A-Za-z@.\-]+\)\s{2,}".into(),
            ],
            context_lines: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub cors: bool,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "latex-snap.log".into(),
        }
    }
}
