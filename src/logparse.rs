use crate::config::Config;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static CONTEXT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^l\.(\d+)\b").expect("context line regex"));

/// The one-line diagnosis pulled out of a TeX log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub message: String,
    /// Line in the assembled source, from the `l.<n>` context line.
    pub source_line: Option<u32>,
}

/// First `! ` error line, else first line mentioning `Error`, else an emergency stop.
pub fn summarize(cfg: &Config, log: &str) -> Option<ErrorSummary> {
    let lines: Vec<&str> = log.lines().collect();

    if let Some(idx) = lines.iter().position(|l| l.starts_with("! ")) {
        let message = lines[idx][2..].trim().to_string();
        let source_line = lines
            .iter()
            .skip(idx + 1)
            .take(cfg.log_filter.context_lines)
            .find_map(|l| CONTEXT_LINE.captures(l))
            .and_then(|c| c[1].parse().ok());
        return Some(ErrorSummary {
            message,
            source_line,
        });
    }

    lines
        .iter()
        .find(|l| l.contains("Error"))
        .or_else(|| lines.iter().find(|l| l.contains("Emergency stop")))
        .map(|l| ErrorSummary {
            message: l.trim().to_string(),
            source_line: None,
        })
}

/// Drops warning lines matched by `[log_filter] warning_patterns`.
pub fn strip_warnings(cfg: &Config, log: &str) -> String {
    let regs: Vec<Regex> = cfg
        .log_filter
        .warning_patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(err) => {
                warn!("ignoring invalid warning pattern {p:?}: {err}");
                None
            }
        })
        .collect();

    log.lines()
        .filter(|line| !regs.iter().any(|r| r.is_match(line.trim_start())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Newline/whitespace cleanup plus a size cap that keeps the tail, where TeX puts its errors.
pub fn normalize(cfg: &Config, log: &str) -> String {
    let normalized = log
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let normalized = normalized.trim_matches('\n');
    truncate_tail(normalized, cfg.limits.max_log_bytes)
}

fn truncate_tail(s: &str, max: usize) -> String {
    if max == 0 || s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {start} bytes truncated ...]\n{}", &s[start..])
}

/// Accumulates every tool's output for one request.
#[derive(Debug, Default, Clone)]
pub struct CompileLog {
    sections: Vec<(String, String)>,
}

impl CompileLog {
    pub fn push(&mut self, step: &str, text: &str) {
        self.sections.push((step.to_string(), text.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|(_, t)| t.trim().is_empty())
    }

    pub fn render(&self) -> String {
        match self.sections.as_slice() {
            [] => String::new(),
            [(_, only)] => only.clone(),
            many => many
                .iter()
                .map(|(step, text)| format!("===== {step} =====\n{text}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
