//! Core data types for Template Forge.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Disk image format produced by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Qcow2,
    Vhd,
    Ova,
}

impl OutputFormat {
    /// Every supported format, in the order the status reporter probes them.
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Qcow2, OutputFormat::Vhd, OutputFormat::Ova];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Qcow2 => "qcow2",
            OutputFormat::Vhd => "vhd",
            OutputFormat::Ova => "ova",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qcow2" => Ok(OutputFormat::Qcow2),
            "vhd" => Ok(OutputFormat::Vhd),
            "ova" => Ok(OutputFormat::Ova),
            _ => Err(format!("Unknown output format: {} (expected qcow2, vhd or ova)", s)),
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Qcow2
    }
}

/// One supported distribution. Created from the catalog, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub version: String,
    pub iso_url: String,
    /// SHA-256 of the media, or a placeholder meaning "not pinned yet".
    pub iso_checksum: String,
    pub packer_template: String,
    pub preparation_script: String,
    pub validation_script: String,
}

/// Bounded retry policy for media downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry `retry` (0-indexed). The wait is the same for every retry.
    pub fn delay_before_retry(&self, _retry: u32) -> Duration {
        self.retry_delay
    }
}

/// HTTP ceilings applied to each download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub total: Duration,
}

/// Cloud-only settings (headless display, builder log capture).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSettings {
    /// X display number handed to the builder, e.g. `:99`.
    pub display: String,
    /// Screen geometry for the virtual display server.
    pub screen: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            display: ":99".to_string(),
            screen: "1024x768x24".to_string(),
        }
    }
}

/// Execution profile, selected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Local,
    Cloud(CloudSettings),
}

impl ExecutionMode {
    pub fn is_cloud(&self) -> bool {
        matches!(self, ExecutionMode::Cloud(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Cloud(_) => "cloud",
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ExecutionMode::Local => RetryPolicy {
                max_attempts: 1,
                retry_delay: Duration::from_secs(10),
            },
            ExecutionMode::Cloud(_) => RetryPolicy {
                max_attempts: 3,
                retry_delay: Duration::from_secs(10),
            },
        }
    }

    pub fn http_timeouts(&self) -> HttpTimeouts {
        match self {
            ExecutionMode::Local => HttpTimeouts {
                connect: Duration::from_secs(30),
                total: Duration::from_secs(4 * 3600),
            },
            ExecutionMode::Cloud(_) => HttpTimeouts {
                connect: Duration::from_secs(60),
                total: Duration::from_secs(3600),
            },
        }
    }
}

/// Per-invocation build options. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Output directory override; `None` means `templates/<id>/output`.
    pub output_dir: Option<PathBuf>,
    pub format: OutputFormat,
    pub skip_validation: bool,
    pub cleanup: bool,
    pub mode: ExecutionMode,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            output_dir: None,
            format: OutputFormat::Qcow2,
            skip_validation: false,
            cleanup: true,
            mode: ExecutionMode::Local,
        }
    }
}

/// Outcome of one target within a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub os: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds.
    pub duration: u64,
}

impl BuildResult {
    pub fn succeeded(os: impl Into<String>, duration: Duration) -> Self {
        BuildResult {
            os: os.into(),
            success: true,
            error: None,
            duration: duration.as_millis() as u64,
        }
    }

    pub fn failed(os: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        BuildResult {
            os: os.into(),
            success: false,
            error: Some(error.into()),
            duration: duration.as_millis() as u64,
        }
    }
}

/// Summary counts for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl ReportSummary {
    pub fn from_flags<I: IntoIterator<Item = bool>>(flags: I) -> Self {
        let mut summary = ReportSummary::default();
        for ok in flags {
            summary.total += 1;
            if ok {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}

/// Aggregate report written once at the end of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// ISO-8601, UTC.
    pub timestamp: String,
    /// Milliseconds.
    pub total_duration: u64,
    pub results: Vec<BuildResult>,
    pub summary: ReportSummary,
}

impl BuildReport {
    pub fn new(results: Vec<BuildResult>, total_duration: Duration) -> Self {
        let summary = ReportSummary::from_flags(results.iter().map(|r| r.success));
        BuildReport {
            timestamp: crate::report::iso_timestamp(),
            total_duration: total_duration.as_millis() as u64,
            results,
            summary,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Result of the standalone validation command for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub os: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

/// Report written by the standalone validation command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: String,
    pub summary: ReportSummary,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        let summary = ReportSummary::from_flags(results.iter().map(|r| r.success));
        ValidationReport {
            timestamp: crate::report::iso_timestamp(),
            summary,
            results,
        }
    }
}

/// Build status derived from the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    NotStarted,
    InProgress,
    Completed,
    /// Never derived from disk; kept so reports and tables share one vocabulary.
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::NotStarted => "not_started",
            BuildStatus::InProgress => "in_progress",
            BuildStatus::Completed => "completed",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            BuildStatus::NotStarted => "⚪",
            BuildStatus::InProgress => "🟡",
            BuildStatus::Completed => "🟢",
            BuildStatus::Failed => "🔴",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one target's build state on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatus {
    pub name: String,
    pub status: BuildStatus,
    pub last_build: Option<DateTime<Local>>,
    pub output_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
}
