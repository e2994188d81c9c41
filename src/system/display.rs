//! Headless X display for cloud builds.

use crate::models::CloudSettings;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// A running virtual display server. The server is killed when this is dropped.
#[derive(Debug)]
pub struct VirtualDisplay {
    display: String,
    _child: Child,
}

impl VirtualDisplay {
    /// Best-effort start of `<server> <display> -screen 0 <geometry>`.
    ///
    /// Returns `None` (after logging a warning) if the server cannot be spawned
    /// or exits immediately, e.g. because the display number is already taken.
    pub async fn start(server: &str, settings: &CloudSettings) -> Option<VirtualDisplay> {
        let spawned = Command::new(server)
            .arg(&settings.display)
            .arg("-screen")
            .arg("0")
            .arg(&settings.screen)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                log::warn!(
                    "[Display] [WARN] Failed to start {} on {}: {} (continuing without display)",
                    server,
                    settings.display,
                    e
                );
                return None;
            }
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                log::warn!(
                    "[Display] [WARN] {} exited early with {} (display {} may already be in use)",
                    server,
                    status,
                    settings.display
                );
                None
            }
            Ok(None) => {
                log::info!("[Display] Started {} on {}", server, settings.display);
                Some(VirtualDisplay {
                    display: settings.display.clone(),
                    _child: child,
                })
            }
            Err(e) => {
                log::warn!("[Display] [WARN] Could not query {}: {}", server, e);
                None
            }
        }
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_server_is_not_fatal() {
        let display = VirtualDisplay::start("template-forge-no-such-xvfb", &CloudSettings::default()).await;
        assert!(display.is_none());
    }

    #[tokio::test]
    async fn test_long_running_server_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-xvfb");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let display = VirtualDisplay::start(script.to_str().unwrap(), &CloudSettings::default())
            .await
            .expect("fake server should stay up");
        assert_eq!(display.display(), ":99");
    }
}
