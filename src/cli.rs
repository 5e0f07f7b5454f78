use crate::{
    assemble,
    config::Config,
    engine::SystemToolchain,
    pipeline::Pipeline,
    request::{CompileRequest, CompileResponse, CompileResult},
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "latex-snap")]
#[command(about = "Compile LaTeX snippets to PNG previews in a throwaway sandbox")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./latex-snap.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report which TeX and image tools are installed.
    Doctor {},
    /// Print the document that would be compiled.
    Assemble {
        #[command(flatten)]
        snippet: SnippetArgs,
    },
    /// Compile a snippet and write the preview PNG.
    Compile {
        #[command(flatten)]
        snippet: SnippetArgs,
        #[arg(long, default_value = "preview.png")]
        out: PathBuf,
        #[arg(long, default_value_t = 1)]
        passes: u32,
        #[arg(long)]
        hide_warnings: bool,
        /// Print the wire response (base64 image) instead of writing a file.
        #[arg(long)]
        json: bool,
    },
    /// Serve the JSON compile API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(clap::Args, Debug)]
pub struct SnippetArgs {
    /// File holding the document body, or `-` for stdin.
    #[arg(long)]
    pub input: PathBuf,
    /// Extra preamble lines appended after the base preamble.
    #[arg(long)]
    pub preamble: Option<PathBuf>,
    /// BibTeX entries to cite from.
    #[arg(long)]
    pub bib: Option<PathBuf>,
    /// Use biblatex + biber instead of natbib + bibtex.
    #[arg(long)]
    pub biblatex: bool,
    /// Skip the graphics path check.
    #[arg(long)]
    pub allow_any_graphics: bool,
}

impl SnippetArgs {
    fn to_request(&self) -> Result<CompileRequest> {
        let mut req = CompileRequest::new(read_input(&self.input)?);
        if let Some(p) = &self.preamble {
            req.preamble_extra = std::fs::read_to_string(p)
                .with_context(|| format!("reading preamble: {}", p.display()))?;
        }
        if let Some(p) = &self.bib {
            req.bib_entries = Some(
                std::fs::read_to_string(p)
                    .with_context(|| format!("reading bibliography: {}", p.display()))?,
            );
        }
        req.use_biblatex = self.biblatex;
        req.sanitize_graphics = !self.allow_any_graphics;
        Ok(req)
    }
}

/// Returns the process exit code.
pub fn dispatch(args: Args) -> Result<i32> {
    let cfg = Config::load_or_default(resolve_config_path(args.config.as_deref()).as_deref())?;
    let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Assemble { snippet } => print_assembled(&cfg, snippet),
        Command::Compile {
            snippet,
            out,
            passes,
            hide_warnings,
            json,
        } => {
            let mut req = snippet.to_request()?;
            req.passes = *passes;
            req.hide_warnings = *hide_warnings;
            compile(&cfg, &req, out, *json)
        }
        Command::Serve { host, port } => {
            let mut cfg = cfg.clone();
            if let Some(h) = host {
                cfg.server.host = h.clone();
            }
            if let Some(p) = port {
                cfg.server.port = *p;
            }
            serve(cfg)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["latex-snap.toml", "latex-snap.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output, so log lines go to stderr.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file || cfg.logging.file_path.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(&cfg.logging.file_path))
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .with_context(|| "reading snippet from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading snippet: {}", path.display()))
}

fn doctor(cfg: &Config) -> Result<i32> {
    let pipeline = Pipeline::new(cfg, SystemToolchain::new(cfg));
    let readiness = pipeline.readiness();
    println!("{}", serde_json::to_string_pretty(&readiness)?);
    Ok(if readiness.ready { 0 } else { 1 })
}

fn print_assembled(cfg: &Config, snippet: &SnippetArgs) -> Result<i32> {
    let req = snippet.to_request()?;
    match assemble::assemble_request(cfg, &req) {
        Ok(doc) => {
            print!("{}", doc.source);
            Ok(0)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(1)
        }
    }
}

fn compile(cfg: &Config, req: &CompileRequest, out: &Path, json: bool) -> Result<i32> {
    let pipeline = Pipeline::new(cfg, SystemToolchain::new(cfg));
    let rendered = pipeline.render(req);

    if json {
        let response = CompileResponse::from(&rendered.result);
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(if response.success { 0 } else { 1 });
    }

    match &rendered.result {
        CompileResult::Success { image_data } => {
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                ensure_dir(parent)?;
            }
            std::fs::write(out, image_data)
                .with_context(|| format!("writing image: {}", out.display()))?;
            info!("wrote {}", out.display());
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "ok",
                    "out": out,
                    "report": rendered.report,
                }))?
            );
            Ok(0)
        }
        CompileResult::Failure { kind, error, log } => {
            if !log.is_empty() {
                eprintln!("{log}");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "failed",
                    "kind": kind,
                    "error": error,
                    "report": rendered.report,
                }))?
            );
            Ok(1)
        }
    }
}

fn serve(cfg: Config) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;
    runtime.block_on(crate::server::serve(cfg))?;
    Ok(0)
}
