//! Turns a caller's snippet into a complete LaTeX document.
//!
//! The base preamble always comes first and is never altered, so the
//! output is a superset of it. Caller text is normalized and, when asked,
//! screened for graphics paths that could reach outside the workspace.

use crate::{
    config::Config,
    error::RenderError,
    request::{BibBackend, CompileRequest},
    workspace::BIB_NAME,
};
use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// A graphics command up to the `{` that opens its path argument.
static GRAPHICS_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(includegraphics|includepdf|includesvg)\*?\s*(?:\[[^\]]*\]\s*)*\{")
        .expect("graphics regex")
});

static GRAPHICSPATH_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(graphicspath)\s*\{").expect("graphicspath regex"));

/// Any mention of a graphics command name, direct or not.
static GRAPHICS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"includegraphics|includepdf|includesvg|graphicspath").expect("graphics name regex")
});

static DOCUMENT_ENV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\documentclass|\\(begin|end)\s*\{document\}").expect("document env regex")
});

static DRIVE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:").expect("drive regex"));

#[derive(Debug, Clone)]
pub struct Bibliography {
    pub entries: String,
    pub backend: BibBackend,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    /// The same document with the bibliography lines left out.
    pub without_bibliography: Option<String>,
    pub bibliography: Option<Bibliography>,
    /// 1-based line in `source` where the caller's body starts.
    pub body_start_line: u32,
    pub body_line_count: u32,
}

impl Document {
    /// Wraps source that was assembled elsewhere; line numbers map one to one.
    pub fn from_source(source: impl Into<String>) -> Self {
        let source = source.into();
        let body_line_count = source.lines().count() as u32;
        Self {
            source,
            without_bibliography: None,
            bibliography: None,
            body_start_line: 1,
            body_line_count,
        }
    }

    /// Maps a line of the assembled source to the snippet's own numbering.
    pub fn body_line(&self, source_line: u32) -> Option<u32> {
        let end = self.body_start_line + self.body_line_count;
        (source_line >= self.body_start_line && source_line < end)
            .then(|| source_line - self.body_start_line + 1)
    }
}

/// Builds the full source for `body`, without bibliography support.
pub fn assemble(
    cfg: &Config,
    body: &str,
    preamble_extra: &str,
    sanitize_graphics: bool,
) -> Result<String, RenderError> {
    let body = validate(cfg, body, preamble_extra, sanitize_graphics)?;
    let preamble_extra = sanitize_text(preamble_extra);
    Ok(layout(cfg, &preamble_extra, &body, None).0)
}

pub fn assemble_request(cfg: &Config, req: &CompileRequest) -> Result<Document, RenderError> {
    let body = validate(cfg, &req.body, &req.preamble_extra, req.sanitize_graphics)?;
    let preamble_extra = sanitize_text(&req.preamble_extra);
    let bibliography = req.bibliography().map(|entries| Bibliography {
        entries: sanitize_text(entries),
        backend: req.bib_backend(),
    });

    let (source, body_start_line) = layout(cfg, &preamble_extra, &body, bibliography.as_ref());
    let without_bibliography = bibliography
        .as_ref()
        .map(|_| layout(cfg, &preamble_extra, &body, None).0);

    Ok(Document {
        source,
        without_bibliography,
        bibliography,
        body_start_line,
        body_line_count: body.lines().count().max(1) as u32,
    })
}

fn validate(
    cfg: &Config,
    body: &str,
    preamble_extra: &str,
    sanitize_graphics: bool,
) -> Result<String, RenderError> {
    if body.trim().is_empty() {
        return Err(RenderError::validation("LaTeX body is empty"));
    }
    if body.len() > cfg.limits.max_body_bytes {
        return Err(RenderError::validation(format!(
            "LaTeX body is too large ({} bytes, limit {})",
            body.len(),
            cfg.limits.max_body_bytes
        )));
    }
    if cfg.security.reject_document_environment {
        for (what, text) in [("body", body), ("preamble", preamble_extra)] {
            if let Some(m) = DOCUMENT_ENV.find(text) {
                return Err(RenderError::validation(format!(
                    "the {what} must not contain `{}`; the document wrapper is added for you",
                    m.as_str()
                )));
            }
        }
    }
    if sanitize_graphics {
        check_graphics_paths(preamble_extra)?;
        check_graphics_paths(body)?;
    }
    Ok(sanitize_text(body))
}

fn layout(
    cfg: &Config,
    preamble_extra: &str,
    body: &str,
    bibliography: Option<&Bibliography>,
) -> (String, u32) {
    let mut out = String::with_capacity(cfg.document.base_preamble.len() + body.len() + 256);
    out.push_str(&cfg.document.base_preamble);
    if !out.ends_with('\n') {
        out.push('\n');
    }

    let extra = preamble_extra.trim();
    if !extra.is_empty() {
        out.push_str(extra);
        out.push('\n');
    }

    let print_command = bibliography.map(|bib| match bib.backend {
        BibBackend::Bibtex => {
            out.push_str("\\usepackage{natbib}\n");
            format!("\\bibliographystyle{{plainnat}}\n\\bibliography{{{BIB_NAME}}}\n")
        }
        BibBackend::Biber => {
            out.push_str(&format!(
                "\\usepackage[style={}]{{biblatex}}\n\\addbibresource{{{BIB_NAME}.bib}}\n",
                cfg.document.biblatex_style
            ));
            "\\printbibliography\n".to_string()
        }
    });

    out.push_str("\n\\begin{document}\n");
    let body_start_line = out.matches('\n').count() as u32 + 1;
    out.push_str(body.trim_end());
    out.push('\n');
    if let Some(cmd) = print_command {
        out.push_str(&cmd);
    }
    out.push_str("\\end{document}\n");
    (out, body_start_line)
}

/// Normalizes newlines and Unicode, and drops control characters TeX would choke on.
pub fn sanitize_text(s: &str) -> String {
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    s.chars()
        .filter(|&ch| ch == '\n' || ch == '\t' || !ch.is_control())
        .nfc()
        .collect()
}

/// Rejects graphics references that could leave the workspace.
///
/// Both the raw text and the text with `%` comments removed are scanned, so
/// a comment can neither hide an argument nor hide a command. A command name
/// that is not directly followed by a literal argument (aliased with `\let`,
/// built with `\csname`, and so on) is refused outright.
pub fn check_graphics_paths(text: &str) -> Result<(), RenderError> {
    check_graphics_view(text)?;
    check_graphics_view(&strip_comments(text))
}

fn check_graphics_view(text: &str) -> Result<(), RenderError> {
    let mut direct = Vec::new();

    for caps in GRAPHICS_HEAD.captures_iter(text) {
        let (Some(head), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        direct.push(name.start());
        let path = group_body(&text[head.end()..]).ok_or_else(|| unbalanced(name.as_str()))?;
        if is_unsafe_path(path) {
            return Err(unsafe_path(name.as_str(), path));
        }
    }

    for caps in GRAPHICSPATH_HEAD.captures_iter(text) {
        let (Some(head), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        direct.push(name.start());
        let inner = group_body(&text[head.end()..]).ok_or_else(|| unbalanced(name.as_str()))?;
        let dirs = top_level_groups(inner).ok_or_else(|| unbalanced(name.as_str()))?;
        if dirs.is_empty() && is_unsafe_path(inner) {
            return Err(unsafe_path(name.as_str(), inner));
        }
        if let Some(dir) = dirs.into_iter().find(|d| is_unsafe_path(d)) {
            return Err(unsafe_path(name.as_str(), dir));
        }
    }

    if let Some(m) = GRAPHICS_NAME.find_iter(text).find(|m| !direct.contains(&m.start())) {
        return Err(RenderError::validation(format!(
            "`\\{}` may only be used directly with a literal path argument",
            m.as_str()
        )));
    }
    Ok(())
}

fn unsafe_path(name: &str, path: &str) -> RenderError {
    RenderError::validation(format!(
        "unsafe path in \\{name}: `{}` (only relative paths inside the workspace are allowed)",
        path.trim()
    ))
}

fn unbalanced(name: &str) -> RenderError {
    RenderError::validation(format!("unbalanced braces in the \\{name} argument"))
}

/// Drops `%` comments through the end of the line, newline included, as TeX does.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        match comment_start(line) {
            Some(idx) => out.push_str(&line[..idx]),
            None => out.push_str(line),
        }
    }
    out
}

fn comment_start(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if ch == '%' && !escaped {
            return Some(idx);
        }
        escaped = ch == '\\' && !escaped;
    }
    None
}

/// Body of a brace group whose `{` has just been consumed, up to its matching `}`.
fn group_body(rest: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, ch) in rest.char_indices() {
        if !escaped {
            match ch {
                '{' => depth += 1,
                '}' if depth == 0 => return Some(&rest[..idx]),
                '}' => depth -= 1,
                _ => {}
            }
        }
        escaped = ch == '\\' && !escaped;
    }
    None
}

/// The `{...}` groups at the top level of `s`, e.g. each directory of `\graphicspath`.
fn top_level_groups(s: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut rest = s;
    while let Some(open) = rest.find('{') {
        let body = group_body(&rest[open + 1..])?;
        groups.push(body);
        rest = &rest[open + 1 + body.len() + 1..];
    }
    Some(groups)
}

/// Absolute paths, home-relative paths, `..` segments, URL/drive prefixes,
/// pipes and macro-built paths are all refused.
pub fn is_unsafe_path(raw: &str) -> bool {
    // `{/etc/passwd}.png` is the same file as `/etc/passwd.png` to graphicx.
    let unbraced: String = raw.chars().filter(|c| !matches!(c, '{' | '}')).collect();
    let p = unbraced.trim().trim_matches('"');
    if p.starts_with('/') || p.starts_with('\\') || p.starts_with('~') || p.starts_with('|') {
        return true;
    }
    if p.contains('\\') || p.contains(':') || DRIVE_LETTER.is_match(p) {
        return true;
    }
    p.split(['/', '\\']).any(|seg| seg.trim() == "..")
}
