//! Durable run reports.
//!
//! Reports are serialized to a temporary file in the destination directory and
//! renamed over the target, so readers see either the previous report or the
//! complete new one.

use crate::config::WorkspaceLayout;
use crate::error::BuildError;
use crate::models::{BuildReport, ValidationReport};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Current time as ISO-8601 UTC with millisecond precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BuildError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| BuildError::io(&dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|e| BuildError::io(path, std::io::Error::from(e)))?;
    tmp.write_all(b"\n").map_err(|e| BuildError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| BuildError::io(path, e))?;
    tmp.persist(path).map_err(|e| BuildError::io(path, e.error))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, BuildError> {
    let content = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| BuildError::io(path, std::io::Error::from(e)))
}

pub fn save_build_report(layout: &WorkspaceLayout, report: &BuildReport) -> Result<PathBuf, BuildError> {
    let path = layout.build_report_path();
    write_json_atomic(&path, report)?;
    log::info!("[Report] Build report saved to {}", path.display());
    Ok(path)
}

pub fn save_validation_report(layout: &WorkspaceLayout, report: &ValidationReport) -> Result<PathBuf, BuildError> {
    let path = layout.validation_report_path();
    write_json_atomic(&path, report)?;
    log::info!("[Report] Validation report saved to {}", path.display());
    Ok(path)
}

/// Age of the last build report, if one exists.
pub fn build_report_age(layout: &WorkspaceLayout) -> Option<Duration> {
    let modified = std::fs::metadata(layout.build_report_path()).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuildResult;

    #[test]
    fn test_timestamp_is_iso8601_utc() {
        let ts = iso_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_report_written_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());

        let first = BuildReport::new(
            vec![BuildResult::failed("beta", "unreachable", Duration::from_millis(5))],
            Duration::from_millis(5),
        );
        save_build_report(&layout, &first).unwrap();

        let second = BuildReport::new(
            vec![BuildResult::succeeded("alpha", Duration::from_millis(7))],
            Duration::from_millis(7),
        );
        let path = save_build_report(&layout, &second).unwrap();

        let loaded: BuildReport = read_json(&path).unwrap();
        assert_eq!(loaded, second);
        assert!(build_report_age(&layout).unwrap() < Duration::from_secs(60));

        // Only the report itself is left; no temp files linger.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
