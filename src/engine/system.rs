use super::{Toolchain, types::*};
use crate::{config::Config, util::find_executable};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs the real TeX and image tools as child processes.
#[derive(Debug, Clone)]
pub struct SystemToolchain {
    programs: BTreeMap<Tool, String>,
    env: BTreeMap<String, String>,
    search_path: Option<OsString>,
}

impl SystemToolchain {
    pub fn new(cfg: &Config) -> Self {
        let t = &cfg.toolchain;
        let programs = Tool::ALL
            .into_iter()
            .map(|tool| {
                let program = match tool {
                    Tool::Latex => &t.latex,
                    Tool::Bibtex => &t.bibtex,
                    Tool::Biber => &t.biber,
                    Tool::Pdftoppm => &t.pdftoppm,
                    Tool::Magick => &t.magick,
                    Tool::Convert => &t.convert,
                    Tool::Pdfcrop => &t.pdfcrop,
                };
                (tool, program.trim().to_string())
            })
            .collect();
        Self {
            programs,
            env: t.env.clone(),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Overrides the PATH used by `locate`; the children still inherit the real one.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }
}

impl Toolchain for SystemToolchain {
    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        let program = self.programs.get(&tool)?;
        if program.is_empty() {
            return None;
        }
        find_executable(program, self.search_path.as_deref())
    }

    fn run(&self, inv: &Invocation) -> Result<ToolOutput, RunError> {
        debug!(
            "run {} {} {:?} timeout={:?}",
            inv.tool,
            inv.program.display(),
            inv.args,
            inv.timeout
        );
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args);
        cmd.current_dir(&inv.cwd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }
        own_process_group(&mut cmd);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            program: inv.program.display().to_string(),
            source,
        })?;

        wait_with_timeout(&mut child, inv.tool, inv.timeout, started)
    }
}

/// How long pipe readers may run past the step deadline once the group is dead.
const PIPE_GRACE: Duration = Duration::from_millis(500);

fn wait_with_timeout(
    child: &mut Child,
    tool: Tool,
    timeout: Duration,
    started: Instant,
) -> Result<ToolOutput, RunError> {
    // Drain pipes while waiting so a chatty TeX run can't block on a full buffer.
    let stdout_thread = drain(child.stdout.take());
    let stderr_thread = drain(child.stderr.take());

    loop {
        let polled = child
            .try_wait()
            .map_err(|source| RunError::Io { tool, source })?;

        if let Some(status) = polled {
            // Helpers still running in the group would keep the pipes open.
            if kill_group(child) {
                debug!("{} left processes behind; killed its group", tool);
            }
            let deadline = started + timeout + PIPE_GRACE;
            let Some((stdout, stderr)) = collect(stdout_thread, stderr_thread, tool, deadline)?
            else {
                return Err(RunError::TimedOut {
                    tool,
                    timeout,
                    elapsed: started.elapsed(),
                    stdout: String::new(),
                    stderr: String::new(),
                });
            };
            return Ok(ToolOutput {
                exit_code: status.code(),
                success: status.success(),
                stdout,
                stderr,
                elapsed: started.elapsed(),
            });
        }

        if started.elapsed() > timeout {
            warn!("{} timed out after {:?}; killing process group", tool, timeout);
            kill_process_tree(child);
            child
                .wait()
                .map_err(|source| RunError::Io { tool, source })?;
            let deadline = Instant::now() + PIPE_GRACE;
            let (stdout, stderr) =
                collect(stdout_thread, stderr_thread, tool, deadline)?.unwrap_or_default();
            return Err(RunError::TimedOut {
                tool,
                timeout,
                elapsed: started.elapsed(),
                stdout,
                stderr,
            });
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            r.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

/// Both pipes' contents, or `None` if something outside the group still holds them at `deadline`.
fn collect(
    stdout: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr: JoinHandle<std::io::Result<Vec<u8>>>,
    tool: Tool,
    deadline: Instant,
) -> Result<Option<(String, String)>, RunError> {
    while !(stdout.is_finished() && stderr.is_finished()) {
        if Instant::now() >= deadline {
            warn!("{} output pipes still open at the deadline; abandoning them", tool);
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(Some((join_reader(stdout, tool)?, join_reader(stderr, tool)?)))
}

fn join_reader(
    handle: JoinHandle<std::io::Result<Vec<u8>>>,
    tool: Tool,
) -> Result<String, RunError> {
    let bytes = handle
        .join()
        .map_err(|_| RunError::Io {
            tool,
            source: std::io::Error::other("pipe reader thread panicked"),
        })?
        .map_err(|source| RunError::Io { tool, source })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL to the child's whole process group. False when no member was left to signal.
#[cfg(unix)]
fn kill_group(child: &Child) -> bool {
    // The child leads its own group, so its pid is the group id. Linux does not
    // reuse a pid while it still names a live process group.
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal.
    unsafe { libc::killpg(pgid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> bool {
    false
}

fn kill_process_tree(child: &mut Child) {
    if !kill_group(child) {
        let _ = child.kill();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> Invocation {
        Invocation::new(
            Tool::Latex,
            PathBuf::from("/bin/sh"),
            std::env::temp_dir(),
            timeout,
        )
        .arg("-c")
        .arg(script)
    }

    #[test]
    fn captures_output_and_status() {
        let tc = SystemToolchain::new(&Config::default());
        let out = tc
            .run(&sh("echo out; echo err >&2; exit 3", Duration::from_secs(5)))
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn kills_the_whole_group_on_timeout() {
        let tc = SystemToolchain::new(&Config::default());
        let started = Instant::now();
        let err = tc
            .run(&sh("sleep 30 & sleep 30; wait", Duration::from_millis(300)))
            .unwrap_err();
        assert!(matches!(err, RunError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn background_helpers_do_not_outlive_a_clean_exit() {
        let tc = SystemToolchain::new(&Config::default());
        let started = Instant::now();
        let out = tc
            .run(&sh("sleep 30 & echo done", Duration::from_secs(20)))
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pipes_held_outside_the_group_cannot_extend_the_deadline() {
        if find_executable("setsid", std::env::var_os("PATH").as_deref()).is_none() {
            return;
        }
        let tc = SystemToolchain::new(&Config::default());
        let started = Instant::now();
        let err = tc
            .run(&sh("setsid sleep 30 & echo done", Duration::from_millis(500)))
            .unwrap_err();
        assert!(matches!(err, RunError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let tc = SystemToolchain::new(&Config::default());
        let inv = Invocation::new(
            Tool::Latex,
            PathBuf::from("/nonexistent/latex-snap-test-binary"),
            std::env::temp_dir(),
            Duration::from_secs(1),
        );
        assert!(matches!(tc.run(&inv), Err(RunError::Spawn { .. })));
    }
}
