// ABOUTME: Shell command execution: foreground runs to completion, background runs past a grace period.
// ABOUTME: One background process is tracked per session; starting another replaces the tracked one.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ToolError;

/// Lines of background output kept for `stop` and early-exit reports.
const TAIL_LINES: usize = 200;

/// How long `stop` waits for a killed process to be reaped.
const STOP_WAIT: Duration = Duration::from_secs(2);

/// How long to wait for output readers to hit EOF once a process has exited.
/// A grandchild that inherited the pipes can hold them open indefinitely.
const DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Output of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr combined for display.
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => format!("[stderr]\n{err}"),
            (out, err) => format!("{out}\n[stderr]\n{err}"),
        }
    }
}

/// How a background start resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundStart {
    /// Still running after the grace period and now tracked.
    Running { pid: Option<u32> },
    /// Exited during the grace period.
    Exited(CommandOutput),
}

#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

struct ActiveProcess {
    command: String,
    child: Child,
    output: Arc<Mutex<OutputTail>>,
    readers: Vec<JoinHandle<()>>,
}

/// A stopped background process and whatever it printed last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedProcess {
    pub command: String,
    pub output_tail: String,
}

fn spawn_tail_reader<R>(reader: R, output: Arc<Mutex<OutputTail>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            output.lock().expect("output lock poisoned").push(line);
        }
    })
}

/// Wait until the readers have consumed everything the process wrote, or give up after `DRAIN_WAIT`.
async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    let drained = tokio::time::timeout(DRAIN_WAIT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("output pipes still open after exit, reporting what was read");
    }
}

/// Runs `sh -c` commands in the workspace directory.
pub struct ProcessManager {
    workdir: PathBuf,
    grace: Duration,
    active: tokio::sync::Mutex<Option<ActiveProcess>>,
}

impl ProcessManager {
    pub fn new(workdir: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            grace,
            active: tokio::sync::Mutex::new(None),
        }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        cmd
    }

    /// Run to completion, collecting stdout, stderr, and the exit code.
    pub async fn run_foreground(&self, command: &str) -> Result<CommandOutput, ToolError> {
        debug!(command, "running foreground command");
        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(ToolError::Spawn)?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    /// Start a command and resolve once it survives the grace period or exits.
    pub async fn start_background(&self, command: &str) -> Result<BackgroundStart, ToolError> {
        let mut child = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ToolError::Spawn)?;

        let output = Arc::new(Mutex::new(OutputTail::default()));
        let stderr_tail = Arc::new(Mutex::new(OutputTail::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_tail_reader(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_tail_reader(stderr, stderr_tail.clone()));
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(ToolError::Spawn)?;
                drain_readers(readers).await;
                let stdout = output.lock().expect("output lock poisoned").render();
                let stderr = stderr_tail.lock().expect("output lock poisoned").render();
                debug!(command, code = ?status.code(), "background command exited during grace period");
                Ok(BackgroundStart::Exited(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: status.code(),
                }))
            }
            Err(_) => {
                let pid = child.id();
                let mut active = self.active.lock().await;
                if let Some(previous) = active.take() {
                    warn!(command = %previous.command, "no longer tracking previous background process");
                }
                info!(command, ?pid, "background process started");
                *active = Some(ActiveProcess {
                    command: command.to_string(),
                    child,
                    output,
                    readers,
                });
                Ok(BackgroundStart::Running { pid })
            }
        }
    }

    /// Command line of the tracked background process, if any.
    pub async fn active_command(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|p| p.command.clone())
    }

    /// Kill the tracked background process and return its output tail.
    pub async fn stop(&self) -> Option<StoppedProcess> {
        let mut process = self.active.lock().await.take()?;
        if let Err(e) = process.child.start_kill() {
            warn!(command = %process.command, error = %e, "failed to signal background process");
        }
        if tokio::time::timeout(STOP_WAIT, process.child.wait()).await.is_err() {
            warn!(command = %process.command, "background process did not exit after kill");
        }
        drain_readers(std::mem::take(&mut process.readers)).await;
        info!(command = %process.command, "background process stopped");
        let output_tail = process.output.lock().expect("output lock poisoned").render();
        Some(StoppedProcess {
            command: process.command,
            output_tail,
        })
    }
}
