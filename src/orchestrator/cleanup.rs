//! Post-build cleanup and the `clean` command.

use crate::config::WorkspaceLayout;
use crate::error::BuildError;
use crate::models::ExecutionMode;
use std::path::{Path, PathBuf};

/// Which parts of a target's work directory `clean` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanScope {
    pub iso: bool,
    pub output: bool,
    pub cache: bool,
}

impl CleanScope {
    /// Resolve CLI flags. Cache is the default unless `--iso` or `--output`
    /// was given on its own; `--all` selects everything.
    pub fn from_flags(iso: bool, output: bool, cache: bool, all: bool) -> Self {
        CleanScope {
            iso: iso || all,
            output: output || all,
            cache: cache || all || (!iso && !output),
        }
    }
}

impl Default for CleanScope {
    fn default() -> Self {
        CleanScope::from_flags(false, false, false, false)
    }
}

/// Remove a file or directory tree. Returns whether anything was removed.
pub fn remove_path(path: &Path) -> Result<bool, BuildError> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(BuildError::io(path, e)),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::io(path, e)),
    }
}

fn remove_all(paths: &[PathBuf]) -> Result<Vec<PathBuf>, BuildError> {
    let mut removed = Vec::new();
    for path in paths {
        if remove_path(path)? {
            log::info!("[Cleanup] Removed {}", path.display());
            removed.push(path.clone());
        }
    }
    Ok(removed)
}

/// Pipeline cleanup step, run only after a successful build.
pub fn cleanup_after_build(
    layout: &WorkspaceLayout,
    name: &str,
    mode: &ExecutionMode,
) -> Result<Vec<PathBuf>, BuildError> {
    let work = layout.work_dir(name);
    let mut paths = vec![work.join("packer_cache"), work.join("tmp")];
    if mode.is_cloud() {
        paths.push(layout.builder_log_path(name));
    }
    log::info!("[Cleanup] [{}] Removing temporary build files", name);
    remove_all(&paths)
}

/// `clean` for one target.
pub fn clean_target(layout: &WorkspaceLayout, name: &str, scope: CleanScope) -> Result<Vec<PathBuf>, BuildError> {
    let mut paths = Vec::new();
    if scope.iso {
        paths.push(layout.media_path(name));
        paths.push(layout.partial_media_path(name));
    }
    if scope.output {
        paths.push(layout.default_output_dir(name));
    }
    if scope.cache {
        paths.extend(layout.cache_dirs(name));
    }
    remove_all(&paths)
}

/// Workspace-wide files removed after every `clean` run.
pub fn clean_global(layout: &WorkspaceLayout) -> Result<Vec<PathBuf>, BuildError> {
    remove_all(&[layout.build_report_path(), layout.global_cache_dir()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CloudSettings;
    use std::fs;

    fn populate(layout: &WorkspaceLayout, name: &str) {
        let work = layout.work_dir(name);
        for dir in ["packer_cache", "tmp", ".packer", "output"] {
            fs::create_dir_all(work.join(dir)).unwrap();
        }
        fs::write(work.join("output").join(format!("{}.qcow2", name)), b"img").unwrap();
        fs::write(layout.media_path(name), b"iso").unwrap();
        fs::write(layout.builder_log_path(name), b"log").unwrap();
    }

    #[test]
    fn test_scope_defaults_to_cache() {
        assert_eq!(CleanScope::default(), CleanScope { iso: false, output: false, cache: true });
        assert_eq!(
            CleanScope::from_flags(true, false, false, false),
            CleanScope { iso: true, output: false, cache: false }
        );
        assert_eq!(
            CleanScope::from_flags(false, false, false, true),
            CleanScope { iso: true, output: true, cache: true }
        );
    }

    #[test]
    fn test_cleanup_after_build_keeps_media_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        populate(&layout, "ubuntu");

        let removed = cleanup_after_build(&layout, "ubuntu", &ExecutionMode::Local).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(layout.media_path("ubuntu").exists());
        assert!(layout.default_output_dir("ubuntu").exists());
        assert!(layout.builder_log_path("ubuntu").exists());

        cleanup_after_build(&layout, "ubuntu", &ExecutionMode::Cloud(CloudSettings::default())).unwrap();
        assert!(!layout.builder_log_path("ubuntu").exists());
    }

    #[test]
    fn test_clean_all_scopes_and_global_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        populate(&layout, "fedora");
        fs::write(layout.build_report_path(), b"{}").unwrap();

        clean_target(&layout, "fedora", CleanScope::from_flags(false, false, false, true)).unwrap();
        clean_global(&layout).unwrap();

        assert!(!layout.media_path("fedora").exists());
        assert!(!layout.default_output_dir("fedora").exists());
        assert!(!layout.work_dir("fedora").join(".packer").exists());
        assert!(!layout.build_report_path().exists());
    }

    #[test]
    fn test_missing_paths_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let removed = clean_target(&layout, "suse", CleanScope::from_flags(true, true, true, false)).unwrap();
        assert!(removed.is_empty());
    }
}
