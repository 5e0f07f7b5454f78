#![allow(dead_code)]

use latex_snap::config::Config;
use latex_snap::engine::{Invocation, RunError, Tool, ToolOutput, Toolchain};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image";

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Exit 0 and leave the artifact the real tool would.
    Succeed,
    /// Exit 1 with this stdout and no artifact.
    Fail(String),
    /// Report a timeout straight away.
    TimeOut,
    /// Sleep, honouring the invocation's timeout, then succeed.
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub tool: Tool,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// `document.tex` as it was when the tool started.
    pub source: Option<String>,
}

#[derive(Default)]
struct State {
    installed: BTreeSet<Tool>,
    behaviors: HashMap<Tool, Behavior>,
    calls: Vec<Call>,
}

#[derive(Clone, Default)]
pub struct FakeToolchain {
    state: Arc<Mutex<State>>,
}

impl FakeToolchain {
    pub fn with_tools(tools: &[Tool]) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().installed = tools.iter().copied().collect();
        fake
    }

    pub fn full() -> Self {
        Self::with_tools(&Tool::ALL)
    }

    /// Engine plus pdftoppm only: no cropping, trimming or bibliography.
    pub fn minimal() -> Self {
        Self::with_tools(&[Tool::Latex, Tool::Pdftoppm])
    }

    pub fn behave(self, tool: Tool, behavior: Behavior) -> Self {
        self.state.lock().unwrap().behaviors.insert(tool, behavior);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, tool: Tool) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.tool == tool).collect()
    }

    pub fn tools_called(&self) -> Vec<Tool> {
        self.calls().into_iter().map(|c| c.tool).collect()
    }
}

impl Toolchain for FakeToolchain {
    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        state
            .installed
            .contains(&tool)
            .then(|| PathBuf::from(format!("/fake/bin/{}", tool.name())))
    }

    fn run(&self, inv: &Invocation) -> Result<ToolOutput, RunError> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                tool: inv.tool,
                args: inv
                    .args
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect(),
                cwd: inv.cwd.clone(),
                env: inv.env.clone(),
                timeout: inv.timeout,
                source: std::fs::read_to_string(inv.cwd.join("document.tex")).ok(),
            });
            state
                .behaviors
                .get(&inv.tool)
                .cloned()
                .unwrap_or(Behavior::Succeed)
        };

        let started = Instant::now();
        match behavior {
            Behavior::Succeed => succeed(inv, started),
            Behavior::Fail(stdout) => Ok(ToolOutput {
                exit_code: Some(1),
                success: false,
                stdout,
                stderr: String::new(),
                elapsed: started.elapsed(),
            }),
            Behavior::TimeOut => Err(timed_out(inv, started, "still running")),
            Behavior::Sleep(d) => {
                if d > inv.timeout {
                    std::thread::sleep(inv.timeout);
                    return Err(timed_out(inv, started, "slept past the deadline"));
                }
                std::thread::sleep(d);
                succeed(inv, started)
            }
        }
    }
}

fn timed_out(inv: &Invocation, started: Instant, stdout: &str) -> RunError {
    RunError::TimedOut {
        tool: inv.tool,
        timeout: inv.timeout,
        elapsed: started.elapsed(),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn succeed(inv: &Invocation, started: Instant) -> Result<ToolOutput, RunError> {
    let last = inv
        .args
        .last()
        .map(PathBuf::from)
        .unwrap_or_default();
    let write = |path: &Path, bytes: &[u8]| {
        std::fs::write(path, bytes).map_err(|source| RunError::Io {
            tool: inv.tool,
            source,
        })
    };
    match inv.tool {
        Tool::Latex => write(&inv.cwd.join("document.pdf"), b"%PDF-1.5 fake")?,
        Tool::Bibtex | Tool::Biber => write(&inv.cwd.join("document.bbl"), b"\\begin{thebibliography}{1}")?,
        Tool::Pdfcrop => write(&last, b"%PDF-1.5 cropped")?,
        Tool::Pdftoppm => write(&last.with_extension("png"), FAKE_PNG)?,
        Tool::Magick | Tool::Convert => write(&last, FAKE_PNG)?,
    }
    Ok(ToolOutput {
        exit_code: Some(0),
        success: true,
        stdout: format!("This is fake {}\nOutput written.", inv.tool),
        stderr: String::new(),
        elapsed: started.elapsed(),
    })
}

/// Config whose workspaces live under `root`, so tests can check cleanup.
pub fn cfg_in(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.work_dir = root.display().to_string();
    cfg
}

pub fn entries_in(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}
