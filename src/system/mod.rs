//! System module: subprocess execution, tool probing, cancellation plumbing.

pub mod display;
pub mod process;

pub use display::VirtualDisplay;
pub use process::{run_logged, LogTail, ProcessOutput, DEFAULT_TAIL_LINES};

use crate::error::BuildError;
use std::process::Stdio;
use tokio::sync::watch;

/// Cancellation signal shared by the scheduler, pipelines and subprocesses.
///
/// `true` means "stop". A dropped sender is treated as "never cancelled".
pub type CancelSignal = watch::Receiver<bool>;

/// A signal that never fires.
pub fn never_cancel() -> CancelSignal {
    let (_tx, rx) = watch::channel(false);
    rx
}

pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    *cancel.borrow()
}

/// Resolve once the signal flips to `true`. Pends forever if the sender is gone.
pub async fn wait_cancelled(cancel: &mut CancelSignal) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Check that `tool` can be spawned by running `<tool> --version`.
///
/// Spawn failure (typically ENOENT) is `ToolNotFound`. A non-zero exit still
/// counts as present: some tools reject `--version` but are installed.
pub async fn probe_tool(tool: &str) -> Result<String, BuildError> {
    let output = tokio::process::Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BuildError::ToolNotFound {
            tool: tool.to_string(),
            detail: e.to_string(),
        })?;

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    if !output.status.success() {
        log::debug!(
            "[System] [PROBE] {} --version exited with {}",
            tool,
            output.status
        );
    }
    Ok(version)
}

/// Logging macros for convenient access
/// Now use the log crate directly for target-aware routing
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::log::info!("{}", msg);
    }}
}

#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        // Use target="parsed" for high-level events
        $crate::log::info!(target: "parsed", "{}", msg);
    }}
}
