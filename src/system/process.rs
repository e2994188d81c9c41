//! Logged subprocess execution.
//!
//! Every invocation gets a [`LogTail`]: a ring buffer of the last N output
//! lines. Lines are forwarded to the global logger as they arrive, and the
//! tail is handed back to the caller so failures can be diagnosed without
//! re-reading log files.

use super::{wait_cancelled, CancelSignal};
use crate::error::BuildError;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Tail length kept for builder and validator output.
pub const DEFAULT_TAIL_LINES: usize = 50;

/// Bounded ring buffer of recent output lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LogTail {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Load the last lines of a text file (e.g. a builder's own log) into a new tail.
    pub fn from_file(path: &std::path::Path, capacity: usize) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut tail = LogTail::new(capacity);
        for line in content.lines() {
            tail.push(line);
        }
        Ok(tail)
    }
}

impl Default for LogTail {
    fn default() -> Self {
        LogTail::new(DEFAULT_TAIL_LINES)
    }
}

/// Exit information and captured tail of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub tail: LogTail,
}

/// Run `command` to completion, streaming stdout and stderr into the logger
/// (prefixed with `label`) and into a ring buffer of `tail_lines` lines.
///
/// When `cancel` fires the child's whole process group is killed and
/// `BuildError::Cancelled` is returned.
pub async fn run_logged(
    mut command: Command,
    label: &str,
    tail_lines: usize,
    cancel: &mut CancelSignal,
) -> Result<ProcessOutput, BuildError> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| BuildError::io(&program, e))?;

    let stdout = child.stdout.take().ok_or_else(|| {
        BuildError::io(&program, std::io::Error::new(std::io::ErrorKind::Other, "failed to capture stdout"))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        BuildError::io(&program, std::io::Error::new(std::io::ErrorKind::Other, "failed to capture stderr"))
    })?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut tail = LogTail::new(tail_lines);

    while !(stdout_closed && stderr_closed) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_closed => match line {
                Ok(Some(line)) => {
                    log::info!("[{}] {}", label, line);
                    tail.push(line);
                }
                Ok(None) => stdout_closed = true,
                Err(e) => {
                    log::warn!("[{}] stdout read error: {}", label, e);
                    stdout_closed = true;
                }
            },
            line = stderr_lines.next_line(), if !stderr_closed => match line {
                Ok(Some(line)) => {
                    log::info!("[{}] [STDERR] {}", label, line);
                    tail.push(line);
                }
                Ok(None) => stderr_closed = true,
                Err(e) => {
                    log::warn!("[{}] stderr read error: {}", label, e);
                    stderr_closed = true;
                }
            },
            _ = wait_cancelled(cancel) => {
                log::warn!("[{}] [CANCEL] Terminating {}", label, program);
                terminate(&mut child).await;
                return Err(BuildError::Cancelled);
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| BuildError::io(&program, e))?,
        _ = wait_cancelled(cancel) => {
            terminate(&mut child).await;
            return Err(BuildError::Cancelled);
        }
    };

    log::debug!("[{}] {} exited with {}", label, program, status);
    Ok(ProcessOutput {
        success: status.success(),
        code: status.code(),
        tail,
    })
}

/// Best-effort kill of the child and every process in its group.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::debug!("[System] [CANCEL] killpg({}) failed: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        log::debug!("[System] [CANCEL] kill failed: {}", e);
    }
}
