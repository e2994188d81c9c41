//! Status Reporter
//!
//! Build status is derived from the filesystem only, so it survives process
//! restarts and needs no coordination with a running scheduler.
//!
//! - output artifact present => completed
//! - media present, no artifact => in_progress
//! - otherwise => not_started
//!
//! `failed` is never derived: failures leave no marker on disk and are only
//! visible in the run's build report.

use crate::config::RuntimeContext;
use crate::models::{BuildStatus, OutputFormat, TemplateStatus};
use chrono::{DateTime, Local};
use std::fmt::Write;
use std::path::PathBuf;

pub struct StatusReporter<'a> {
    ctx: &'a RuntimeContext,
    /// `None` probes every known format.
    format: Option<OutputFormat>,
}

impl<'a> StatusReporter<'a> {
    /// Probe only the context's configured output format.
    pub fn new(ctx: &'a RuntimeContext) -> Self {
        StatusReporter {
            ctx,
            format: Some(ctx.options.format),
        }
    }

    /// Probe every output format, first match wins.
    pub fn any_format(ctx: &'a RuntimeContext) -> Self {
        StatusReporter { ctx, format: None }
    }

    fn candidate_artifacts(&self, name: &str) -> Vec<PathBuf> {
        let output_dir = self.ctx.output_dir(name);
        let formats: Vec<OutputFormat> = match self.format {
            Some(format) => vec![format],
            None => OutputFormat::ALL.to_vec(),
        };
        formats
            .into_iter()
            .map(|format| self.ctx.layout.artifact_path(name, &output_dir, format))
            .collect()
    }

    pub fn status(&self, name: &str) -> TemplateStatus {
        for artifact in self.candidate_artifacts(name) {
            if let Ok(meta) = std::fs::metadata(&artifact) {
                if meta.is_file() {
                    let last_build = meta.modified().ok().map(DateTime::<Local>::from);
                    return TemplateStatus {
                        name: name.to_string(),
                        status: BuildStatus::Completed,
                        last_build,
                        output_path: Some(artifact),
                        size_bytes: Some(meta.len()),
                    };
                }
            }
        }

        let status = if self.ctx.layout.media_path(name).is_file() {
            BuildStatus::InProgress
        } else {
            BuildStatus::NotStarted
        };
        TemplateStatus {
            name: name.to_string(),
            status,
            last_build: None,
            output_path: None,
            size_bytes: None,
        }
    }

    pub fn statuses<'n, I>(&self, names: I) -> Vec<TemplateStatus>
    where
        I: IntoIterator<Item = &'n str>,
    {
        names.into_iter().map(|name| self.status(name)).collect()
    }
}

/// Human-readable size with two decimals, base 1024.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Status table followed by per-status counts and total size.
pub fn render_table(statuses: &[TemplateStatus]) -> String {
    let width = statuses.iter().map(|s| s.name.len()).max().unwrap_or(2).max(2);
    let mut out = String::new();

    let _ = writeln!(out, "{:<width$} | {:<13} | {:<19} | Size", "OS", "Status", "Last Build", width = width);
    let _ = writeln!(out, "{}|{}|{}|{}", "-".repeat(width + 1), "-".repeat(15), "-".repeat(21), "-".repeat(12));

    for s in statuses {
        let status = format!("{} {}", s.status.emoji(), s.status.as_str().replace('_', " "));
        let last = s
            .last_build
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Never".to_string());
        let size = s.size_bytes.map(format_bytes).unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<width$} | {:<13} | {:<19} | {}", s.name, status, last, size, width = width);
    }

    let count = |wanted: BuildStatus| statuses.iter().filter(|s| s.status == wanted).count();
    let total_size: u64 = statuses.iter().filter_map(|s| s.size_bytes).sum();

    let _ = writeln!(out);
    let _ = writeln!(out, "📈 Summary:");
    let _ = writeln!(out, "   Total templates: {}", statuses.len());
    let _ = writeln!(out, "   Completed: {}", count(BuildStatus::Completed));
    let _ = writeln!(out, "   In progress: {}", count(BuildStatus::InProgress));
    let _ = writeln!(out, "   Not started: {}", count(BuildStatus::NotStarted));
    let _ = writeln!(out, "   Failed: {}", count(BuildStatus::Failed));
    if total_size > 0 {
        let _ = writeln!(out, "   Total size: {}", format_bytes(total_size));
    }
    out
}
