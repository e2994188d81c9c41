//! Runtime configuration.
//!
//! `RuntimeContext` is built exactly once at process start (from the process
//! environment) and handed explicitly to the scheduler, pipelines and the
//! environment prober. Nothing below this module reads environment variables.

pub mod loader;

use crate::models::{BuildOptions, OutputFormat, TargetConfig};
use std::path::{Path, PathBuf};

pub use loader::{load_registry_profiles, RegistryProfile};

/// Default window size for batch builds.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Filesystem layout of a template workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkspaceLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `templates/<id>`, owned exclusively by that target's pipeline.
    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.root.join("templates").join(name)
    }

    pub fn media_path(&self, name: &str) -> PathBuf {
        self.work_dir(name).join(format!("{}.iso", name))
    }

    /// Temporary download location, same directory as the final media file.
    pub fn partial_media_path(&self, name: &str) -> PathBuf {
        self.work_dir(name).join(format!("{}.iso.part", name))
    }

    pub fn template_path(&self, target: &TargetConfig) -> PathBuf {
        self.work_dir(&target.name).join(&target.packer_template)
    }

    pub fn default_output_dir(&self, name: &str) -> PathBuf {
        self.work_dir(name).join("output")
    }

    /// Output directory for a target under the given options.
    pub fn output_dir(&self, name: &str, options: &BuildOptions) -> PathBuf {
        match &options.output_dir {
            Some(dir) => dir.clone(),
            None => self.default_output_dir(name),
        }
    }

    pub fn artifact_path(&self, name: &str, output_dir: &Path, format: OutputFormat) -> PathBuf {
        output_dir.join(format!("{}.{}", name, format.as_str()))
    }

    pub fn builder_log_path(&self, name: &str) -> PathBuf {
        self.work_dir(name).join("packer.log")
    }

    pub fn http_dir(&self, name: &str) -> PathBuf {
        self.work_dir(name).join("http")
    }

    /// Builder scratch directories removed by cleanup.
    pub fn cache_dirs(&self, name: &str) -> Vec<PathBuf> {
        let work = self.work_dir(name);
        vec![work.join("packer_cache"), work.join("tmp"), work.join(".packer")]
    }

    pub fn validation_script(&self, target: &TargetConfig) -> PathBuf {
        self.root
            .join("scripts")
            .join("validation")
            .join(&target.validation_script)
    }

    pub fn build_report_path(&self) -> PathBuf {
        self.root.join("build-report.json")
    }

    pub fn validation_report_path(&self) -> PathBuf {
        self.root.join("validation-report.json")
    }

    pub fn global_cache_dir(&self) -> PathBuf {
        self.root.join("packer_cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// External tools the pipeline drives or probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Image builder binary (`packer`).
    pub builder: String,
    /// Virtualization binary (`qemu-system-x86_64`).
    pub hypervisor: String,
    /// Hardware acceleration device probed in cloud mode.
    pub accel_device: PathBuf,
    /// Virtual display server started in cloud mode.
    pub display_server: String,
    /// Command prefix used to run validation procedures; the script path is appended.
    pub validation_runner: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            builder: "packer".to_string(),
            hypervisor: "qemu-system-x86_64".to_string(),
            accel_device: PathBuf::from("/dev/kvm"),
            display_server: "Xvfb".to_string(),
            validation_runner: vec!["deno".to_string(), "run".to_string(), "--allow-all".to_string()],
        }
    }
}

/// Immutable per-process context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub layout: WorkspaceLayout,
    pub tools: ToolConfig,
    pub options: BuildOptions,
    pub max_concurrency: usize,
}

impl RuntimeContext {
    pub fn new(root: impl Into<PathBuf>, options: BuildOptions) -> Self {
        RuntimeContext {
            layout: WorkspaceLayout::new(root),
            tools: ToolConfig::default(),
            options,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Build the context from the real process environment.
    pub fn from_env() -> Result<Self, crate::error::ConfigError> {
        let cwd = std::env::current_dir()?;
        loader::context_from_lookup(|key| std::env::var(key).ok(), &cwd)
    }

    pub fn with_tools(mut self, tools: ToolConfig) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.layout.output_dir(name, &self.options)
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.layout
            .artifact_path(name, &self.output_dir(name), self.options.format)
    }
}
