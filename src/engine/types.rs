use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Latex,
    Bibtex,
    Biber,
    Pdftoppm,
    Magick,
    Convert,
    Pdfcrop,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::Latex,
        Tool::Bibtex,
        Tool::Biber,
        Tool::Pdftoppm,
        Tool::Magick,
        Tool::Convert,
        Tool::Pdfcrop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Latex => "latex",
            Tool::Bibtex => "bibtex",
            Tool::Biber => "biber",
            Tool::Pdftoppm => "pdftoppm",
            Tool::Magick => "magick",
            Tool::Convert => "convert",
            Tool::Pdfcrop => "pdfcrop",
        }
    }

    pub fn is_image_converter(self) -> bool {
        matches!(self, Tool::Pdftoppm | Tool::Magick | Tool::Convert)
    }

    pub fn is_imagemagick(self) -> bool {
        matches!(self, Tool::Magick | Tool::Convert)
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One external process run, fully described.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(tool: Tool, program: PathBuf, cwd: PathBuf, timeout: Duration) -> Self {
        Self {
            tool,
            program,
            args: Vec::new(),
            cwd,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    /// stdout and stderr joined, the way the tool's log is reported.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exceeded timeout ({timeout:?})")]
    TimedOut {
        tool: Tool,
        timeout: Duration,
        elapsed: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("i/o while running {tool}: {source}")]
    Io {
        tool: Tool,
        #[source]
        source: std::io::Error,
    },
}
