use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    pub body: String,
    #[serde(default)]
    pub preamble_extra: String,
    #[serde(default = "default_true")]
    pub sanitize_graphics: bool,
    #[serde(default = "default_passes")]
    pub passes: u32,
    #[serde(default)]
    pub hide_warnings: bool,
    /// Raw BibTeX entries, written to `references.bib`.
    #[serde(default)]
    pub bib_entries: Option<String>,
    #[serde(default)]
    pub use_biblatex: bool,
}

fn default_true() -> bool {
    true
}

fn default_passes() -> u32 {
    1
}

impl CompileRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            preamble_extra: String::new(),
            sanitize_graphics: true,
            passes: 1,
            hide_warnings: false,
            bib_entries: None,
            use_biblatex: false,
        }
    }

    /// Bibliography entries, if any non-blank ones were supplied.
    pub fn bibliography(&self) -> Option<&str> {
        self.bib_entries
            .as_deref()
            .filter(|entries| !entries.trim().is_empty())
    }

    pub fn bib_backend(&self) -> BibBackend {
        if self.use_biblatex {
            BibBackend::Biber
        } else {
            BibBackend::Bibtex
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BibBackend {
    /// natbib + bibtex
    Bibtex,
    /// biblatex + biber
    Biber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ToolMissing,
    Timeout,
    CompileError,
    ConversionError,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Success {
        image_data: Vec<u8>,
    },
    Failure {
        kind: FailureKind,
        error: String,
        log: String,
    },
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CompileResult::Success { .. } => None,
            CompileResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Wire shape shared by success and failure; callers discriminate on `success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl CompileResponse {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            image_data: None,
            error: Some(error.into()),
            log: None,
            kind: Some(FailureKind::Validation),
        }
    }
}

impl From<&CompileResult> for CompileResponse {
    fn from(result: &CompileResult) -> Self {
        match result {
            CompileResult::Success { image_data } => Self {
                success: true,
                image_data: Some(BASE64.encode(image_data)),
                error: None,
                log: None,
                kind: None,
            },
            CompileResult::Failure { kind, error, log } => Self {
                success: false,
                image_data: None,
                error: Some(error.clone()),
                log: (!log.is_empty()).then(|| log.clone()),
                kind: Some(*kind),
            },
        }
    }
}

impl From<CompileResult> for CompileResponse {
    fn from(result: CompileResult) -> Self {
        Self::from(&result)
    }
}
