use crate::{
    assemble::{self, Document},
    config::Config,
    engine::{Invocation, RunError, Tool, ToolOutput, Toolchain},
    error::RenderError,
    logparse::{self, CompileLog},
    plan::{PassPlan, ResolvedTools, bibliography_processor},
    probe::{self, ToolAvailability},
    report::{BibliographyReport, RenderReport},
    request::{CompileRequest, CompileResult},
    util::{now_rfc3339, sha256_hex},
    workspace::{JOB_NAME, Workspace},
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct Pipeline<T: Toolchain> {
    cfg: Config,
    toolchain: T,
}

pub struct Rendered {
    pub result: CompileResult,
    pub report: RenderReport,
}

/// Wall-clock allowance shared by every tool run of one request.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    total: Duration,
}

impl Budget {
    pub fn new(total: Duration) -> Self {
        Self {
            started: Instant::now(),
            total,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.started.elapsed())
    }

    /// Timeout for the next step, or `None` once the budget is spent.
    pub fn slice(&self, cap: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        (!remaining.is_zero()).then(|| remaining.min(cap))
    }
}

impl<T: Toolchain> Pipeline<T> {
    pub fn new(cfg: &Config, toolchain: T) -> Self {
        Self {
            cfg: cfg.clone(),
            toolchain,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn readiness(&self) -> ToolAvailability {
        probe::check_readiness(&self.toolchain)
    }

    /// The single entry point: never panics on bad input and never returns an error.
    pub fn compile_snippet(&self, req: &CompileRequest) -> CompileResult {
        self.render(req).result
    }

    pub fn render(&self, req: &CompileRequest) -> Rendered {
        let started = Instant::now();
        let mut report = RenderReport {
            started: now_rfc3339(),
            ..Default::default()
        };
        info!(
            "compile request body_bytes={} passes={} bibliography={}",
            req.body.len(),
            req.passes,
            req.bibliography().is_some()
        );

        let budget = Budget::new(self.total_budget());
        let outcome = assemble::assemble_request(&self.cfg, req).and_then(|doc| {
            let tools = ResolvedTools::resolve(&self.toolchain);
            let plan = PassPlan::new(&self.cfg, req, &tools)?;
            debug!(?plan, "pass plan");
            self.execute(&doc, &plan, &tools, budget, &mut report)
        });

        let result = self.finish(outcome, req.hide_warnings, started, &mut report);
        Rendered { result, report }
    }

    /// Compiles source that is already a complete document.
    pub fn compile(
        &self,
        full_source: &str,
        passes: u32,
        hide_warnings: bool,
        timeout_budget: Duration,
    ) -> CompileResult {
        let started = Instant::now();
        let mut report = RenderReport {
            started: now_rfc3339(),
            ..Default::default()
        };
        let budget = Budget::new(timeout_budget);

        let outcome = if full_source.trim().is_empty() {
            Err(RenderError::validation("LaTeX source is empty"))
        } else {
            let req = CompileRequest {
                passes,
                ..CompileRequest::new(full_source)
            };
            let tools = ResolvedTools::resolve(&self.toolchain);
            PassPlan::new(&self.cfg, &req, &tools).and_then(|plan| {
                let doc = Document::from_source(full_source);
                self.execute(&doc, &plan, &tools, budget, &mut report)
            })
        };

        self.finish(outcome, hide_warnings, started, &mut report)
    }

    fn total_budget(&self) -> Duration {
        Duration::from_secs(self.cfg.limits.total_timeout_seconds.max(1))
    }

    fn execute(
        &self,
        doc: &Document,
        plan: &PassPlan,
        tools: &ResolvedTools,
        budget: Budget,
        report: &mut RenderReport,
    ) -> Result<Vec<u8>, RenderError> {
        let ws = Workspace::create(&self.cfg)?;
        let outcome = Job {
            cfg: &self.cfg,
            toolchain: &self.toolchain,
            ws: &ws,
            tools,
            budget,
            log: CompileLog::default(),
            report,
        }
        .run(doc, plan);
        ws.close();
        outcome
    }

    fn finish(
        &self,
        outcome: Result<Vec<u8>, RenderError>,
        hide_warnings: bool,
        started: Instant,
        report: &mut RenderReport,
    ) -> CompileResult {
        report.duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(image_data) => {
                report.image_bytes = image_data.len();
                report.image_sha256 = Some(sha256_hex(&image_data));
                info!(
                    "rendered {} bytes in {}ms passes={} converter={:?}",
                    image_data.len(),
                    report.duration_ms,
                    report.passes_run,
                    report.converter
                );
                CompileResult::Success { image_data }
            }
            Err(err) => {
                let kind = err.kind();
                report.failure = Some(kind);
                warn!("compile failed kind={:?} after {}ms: {}", kind, report.duration_ms, err);
                let mut log = err.log().to_string();
                if hide_warnings {
                    log = logparse::strip_warnings(&self.cfg, &log);
                }
                CompileResult::Failure {
                    kind,
                    error: err.to_string(),
                    log: logparse::normalize(&self.cfg, &log),
                }
            }
        }
    }
}

/// State for one request inside its workspace.
struct Job<'a, T: Toolchain> {
    cfg: &'a Config,
    toolchain: &'a T,
    ws: &'a Workspace,
    tools: &'a ResolvedTools,
    budget: Budget,
    log: CompileLog,
    report: &'a mut RenderReport,
}

impl<T: Toolchain> Job<'_, T> {
    fn run(mut self, doc: &Document, plan: &PassPlan) -> Result<Vec<u8>, RenderError> {
        let mut source = doc.source.as_str();
        if let Some(bib) = &doc.bibliography {
            if plan.bibliography_unavailable {
                let processor = bibliography_processor(bib.backend);
                warn!("{} is not installed; typesetting without the bibliography", processor);
                self.log.push(
                    "bibliography",
                    &format!("{processor} is not installed; bibliography omitted"),
                );
                self.report.bibliography = Some(BibliographyReport {
                    processor: None,
                    ok: false,
                    dropped: true,
                });
                source = doc.without_bibliography.as_deref().unwrap_or(source);
            } else {
                self.ws.write_bibliography(&bib.entries)?;
            }
        }
        self.ws.write_source(source)?;

        self.typeset(doc, plan)?;

        if !self.ws.pdf_path().exists() {
            return Err(RenderError::Compile {
                summary: "LaTeX produced no PDF output".to_string(),
                log: self.log.render(),
            });
        }

        let png = self.convert(plan)?;
        let image = std::fs::read(&png)?;
        if image.is_empty() {
            return Err(RenderError::Conversion {
                message: "image converter produced an empty file".to_string(),
                log: self.log.render(),
            });
        }
        Ok(image)
    }

    fn typeset(&mut self, doc: &Document, plan: &PassPlan) -> Result<(), RenderError> {
        let mut bibliography_pending = plan.bibliography;
        let mut pass = 0;
        while pass < plan.passes {
            pass += 1;
            self.report.passes_run += 1;

            let step = format!("LaTeX compilation (pass {})", self.report.passes_run);
            let inv = self.latex_invocation()?;
            let out = self.run_step(&step, inv)?;
            if !out.success {
                return Err(RenderError::Compile {
                    summary: self.compile_summary(doc, &out.combined()),
                    log: self.log.render(),
                });
            }

            if let Some(processor) = bibliography_pending.take() {
                let ok = self.bibliography(processor);
                let dropped = !ok && !self.ws.bbl_path().exists();
                self.report.bibliography = Some(BibliographyReport {
                    processor: Some(processor),
                    ok,
                    dropped,
                });
                if let (true, Some(fallback)) = (dropped, doc.without_bibliography.as_deref()) {
                    warn!("{} left no citation data; retrying without the bibliography", processor);
                    self.ws.write_source(fallback)?;
                    pass = 0;
                }
            }
        }
        Ok(())
    }

    fn latex_invocation(&self) -> Result<Invocation, RenderError> {
        let program = self.tools.require(Tool::Latex)?.to_path_buf();
        let mut inv = self
            .invocation(Tool::Latex, program)
            .args(["-interaction=nonstopmode", "-halt-on-error"]);
        if self.cfg.security.disable_shell_escape {
            inv = inv.arg("-no-shell-escape");
        }
        Ok(inv.arg(format!("{JOB_NAME}.tex")))
    }

    /// Runs bibtex/biber once. Failure is folded into the log, never fatal.
    fn bibliography(&mut self, processor: Tool) -> bool {
        let program = match self.tools.require(processor) {
            Ok(p) => p.to_path_buf(),
            Err(err) => {
                self.log.push(processor.name(), &err.to_string());
                return false;
            }
        };
        let inv = self.invocation(processor, program).arg(JOB_NAME);
        match self.run_step(processor.name(), inv) {
            Ok(out) => {
                if !out.success {
                    warn!("{} exited with {:?}; continuing", processor, out.exit_code);
                }
                out.success
            }
            Err(err) => {
                warn!("{} did not complete: {err}", processor);
                if !matches!(err, RenderError::Timeout { .. }) {
                    self.log.push(processor.name(), &err.to_string());
                }
                false
            }
        }
    }

    fn convert(&mut self, plan: &PassPlan) -> Result<PathBuf, RenderError> {
        let mut source_pdf = self.ws.pdf_path();
        if plan.crop {
            if let Some(cropped) = self.crop() {
                source_pdf = cropped;
                self.report.cropped = true;
            }
        }

        let png = self.ws.png_path();
        let mut failures = Vec::new();
        for &tool in &plan.converters {
            let Some(program) = self.tools.path(tool).map(Path::to_path_buf) else {
                continue;
            };
            let inv = self.converter_invocation(tool, program, &source_pdf, &png);
            match self.run_step(&format!("{tool} conversion"), inv) {
                Ok(out) if out.success && png.exists() => {
                    self.report.converter = Some(tool);
                    if !self.report.cropped {
                        if let Some(trimmer) = plan.trim_with {
                            self.trim(trimmer, &png);
                        }
                    }
                    return Ok(png);
                }
                Ok(out) => {
                    warn!("{} failed (exit {:?}); trying next converter", tool, out.exit_code);
                    failures.push(format!("{tool} exited with {:?}", out.exit_code));
                    let _ = std::fs::remove_file(&png);
                }
                Err(err @ RenderError::Timeout { .. }) => return Err(err),
                Err(err) => {
                    warn!("{} could not run: {err}", tool);
                    failures.push(format!("{tool}: {err}"));
                }
            }
        }

        Err(RenderError::Conversion {
            message: format!("failed to convert PDF to PNG ({})", failures.join("; ")),
            log: self.log.render(),
        })
    }

    fn converter_invocation(&self, tool: Tool, program: PathBuf, pdf: &Path, png: &Path) -> Invocation {
        let dpi = self.cfg.render.dpi.to_string();
        let inv = self.invocation(tool, program);
        if tool == Tool::Pdftoppm {
            // pdftoppm appends the extension itself.
            inv.args(["-png", "-singlefile", "-f", "1", "-l", "1", "-r", dpi.as_str()])
                .arg(pdf)
                .arg(png.with_extension(""))
        } else {
            let mut first_page = pdf.as_os_str().to_owned();
            first_page.push("[0]");
            inv.args(["-density", dpi.as_str()])
                .arg(first_page)
                .args(["-background", "white", "-alpha", "remove", "-alpha", "off"])
                .arg(png)
        }
    }

    /// Vector crop before rasterizing; any failure just keeps the full page.
    fn crop(&mut self) -> Option<PathBuf> {
        let program = self.tools.path(Tool::Pdfcrop)?.to_path_buf();
        let cropped = self.ws.cropped_pdf_path();
        let inv = self
            .invocation(Tool::Pdfcrop, program)
            .arg("--margins")
            .arg(self.cfg.render.crop_margin_bp.to_string())
            .arg(self.ws.pdf_path())
            .arg(&cropped);
        match self.run_step("pdfcrop", inv) {
            Ok(out) if out.success && cropped.exists() => Some(cropped),
            Ok(out) => {
                warn!("pdfcrop exited with {:?}; using the uncropped PDF", out.exit_code);
                None
            }
            Err(err) => {
                warn!("pdfcrop did not complete: {err}");
                None
            }
        }
    }

    fn trim(&mut self, tool: Tool, png: &Path) {
        let Some(program) = self.tools.path(tool).map(Path::to_path_buf) else {
            return;
        };
        let inv = self
            .invocation(tool, program)
            .arg(png)
            .args(["-trim", "+repage"])
            .arg(png);
        match self.run_step("trim", inv) {
            Ok(out) if out.success => {}
            Ok(out) => warn!("trim exited with {:?}; keeping untrimmed image", out.exit_code),
            Err(err) => warn!("trim did not complete: {err}"),
        }
    }

    fn invocation(&self, tool: Tool, program: PathBuf) -> Invocation {
        let mut inv = Invocation::new(tool, program, self.ws.path().to_path_buf(), Duration::ZERO);
        if self.cfg.security.paranoid_file_access {
            inv = inv
                .env("openin_any", "p")
                .env("openout_any", "p")
                .env("TEXMFOUTPUT", self.ws.path().display().to_string());
        }
        inv
    }

    fn run_step(&mut self, step: &str, mut inv: Invocation) -> Result<ToolOutput, RenderError> {
        let cap = Duration::from_secs(self.cfg.limits.step_timeout_seconds.max(1));
        let Some(timeout) = self.budget.slice(cap) else {
            return Err(RenderError::Timeout {
                step: step.to_string(),
                elapsed: self.budget.elapsed(),
                log: self.log.render(),
            });
        };
        inv.timeout = timeout;

        match self.toolchain.run(&inv) {
            Ok(out) => {
                debug!("{} exit={:?} elapsed={:?}", step, out.exit_code, out.elapsed);
                self.log.push(step, &out.combined());
                Ok(out)
            }
            Err(RunError::TimedOut { stdout, stderr, .. }) => {
                self.log.push(step, &format!("{stdout}\n{stderr}"));
                Err(RenderError::Timeout {
                    step: step.to_string(),
                    elapsed: self.budget.elapsed(),
                    log: self.log.render(),
                })
            }
            Err(RunError::Spawn { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Err(RenderError::ToolMissing {
                    tool: inv.tool.name().to_string(),
                })
            }
            Err(RunError::Spawn { source, .. }) | Err(RunError::Io { source, .. }) => {
                Err(RenderError::Internal(source))
            }
        }
    }

    fn compile_summary(&self, doc: &Document, output: &str) -> String {
        match logparse::summarize(self.cfg, output) {
            Some(summary) => match summary.source_line.and_then(|l| doc.body_line(l)) {
                Some(line) => format!("{} (snippet line {line})", summary.message),
                None => summary.message,
            },
            None => "LaTeX compilation failed".to_string(),
        }
    }
}
