use crate::request::FailureKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Validation(String),
    #[error("required tool `{tool}` is not installed or not on PATH")]
    ToolMissing { tool: String },
    #[error("{step} timed out after {}s", elapsed.as_secs())]
    Timeout {
        step: String,
        elapsed: Duration,
        log: String,
    },
    #[error("{summary}")]
    Compile { summary: String, log: String },
    #[error("{message}")]
    Conversion { message: String, log: String },
    #[error("unexpected error: {0}")]
    Internal(#[from] std::io::Error),
}

impl RenderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RenderError::Validation(msg.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RenderError::Validation(_) => FailureKind::Validation,
            RenderError::ToolMissing { .. } => FailureKind::ToolMissing,
            RenderError::Timeout { .. } => FailureKind::Timeout,
            RenderError::Compile { .. } => FailureKind::CompileError,
            RenderError::Conversion { .. } => FailureKind::ConversionError,
            RenderError::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn log(&self) -> &str {
        match self {
            RenderError::Timeout { log, .. }
            | RenderError::Compile { log, .. }
            | RenderError::Conversion { log, .. } => log,
            _ => "",
        }
    }
}
