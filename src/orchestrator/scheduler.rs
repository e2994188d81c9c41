//! Batch Scheduler
//!
//! Targets are split into consecutive windows of `limit` targets. Every
//! pipeline in a window runs concurrently, and the next window starts only
//! once all members of the current one have finished. A failing pipeline
//! never cancels its siblings.
//!
//! In cloud mode the scheduler starts the virtual display once and keeps it
//! alive until the last window has finished, so every pipeline of the run
//! builds against the same server.

use super::TemplatePipeline;
use crate::config::RuntimeContext;
use crate::error::BuildError;
use crate::media::MediaAcquirer;
use crate::models::{BuildReport, BuildResult, ExecutionMode, TargetConfig};
use crate::report::save_build_report;
use crate::system::{is_cancelled, CancelSignal, VirtualDisplay};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error text recorded for targets whose window never started.
pub const NOT_STARTED_ERROR: &str = "cancelled before start";

/// Split `items` into consecutive windows of at most `limit` items (limit 0 is treated as 1).
pub fn partition<T: Clone>(items: &[T], limit: usize) -> Vec<Vec<T>> {
    items.chunks(limit.max(1)).map(|chunk| chunk.to_vec()).collect()
}

pub struct BatchScheduler {
    ctx: Arc<RuntimeContext>,
    media: MediaAcquirer,
    cancel_rx: CancelSignal,
}

impl BatchScheduler {
    /// Scheduler with the default HTTP media source for the context's mode.
    pub fn new(ctx: Arc<RuntimeContext>, cancel_rx: CancelSignal) -> Result<Self, BuildError> {
        let media = MediaAcquirer::new(&ctx)?;
        Ok(Self::with_media(ctx, media, cancel_rx))
    }

    pub fn with_media(ctx: Arc<RuntimeContext>, media: MediaAcquirer, cancel_rx: CancelSignal) -> Self {
        BatchScheduler { ctx, media, cancel_rx }
    }

    /// Build every target and persist `build-report.json`.
    ///
    /// The report always holds exactly one result per requested target, in
    /// request order. It is written before returning, whatever the outcome.
    pub async fn run_all(&self, targets: &[TargetConfig], limit: usize) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let windows = partition(targets, limit);
        let mut results: Vec<BuildResult> = Vec::with_capacity(targets.len());

        log::info!(
            "[Scheduler] Building {} target(s) in {} window(s) of up to {} ({} mode)",
            targets.len(),
            windows.len(),
            limit.max(1),
            self.ctx.options.mode.as_str()
        );

        // One server for the whole run; siblings all build against it.
        let display = self.start_display(targets).await;

        for (index, window) in windows.iter().enumerate() {
            if is_cancelled(&self.cancel_rx) {
                log::warn!("[Scheduler] [CANCEL] Skipping window {}/{}", index + 1, windows.len());
                results.extend(
                    window
                        .iter()
                        .map(|t| BuildResult::failed(&t.name, NOT_STARTED_ERROR, Duration::ZERO)),
                );
                continue;
            }

            let names: Vec<&str> = window.iter().map(|t| t.name.as_str()).collect();
            crate::log_parsed!(
                "[Scheduler] Window {}/{}: {}",
                index + 1,
                windows.len(),
                names.join(", ")
            );

            let window_results = join_all(window.iter().map(|t| self.run_one(t.clone()))).await;
            results.extend(window_results);
        }

        drop(display);

        let report = BuildReport::new(results, started.elapsed());
        save_build_report(&self.ctx.layout, &report)?;

        for line in summary_lines(&report) {
            crate::log_parsed!("{}", line);
        }
        Ok(report)
    }

    async fn start_display(&self, targets: &[TargetConfig]) -> Option<VirtualDisplay> {
        match &self.ctx.options.mode {
            ExecutionMode::Cloud(settings) if !targets.is_empty() && !is_cancelled(&self.cancel_rx) => {
                VirtualDisplay::start(&self.ctx.tools.display_server, settings).await
            }
            _ => None,
        }
    }

    async fn run_one(&self, target: TargetConfig) -> BuildResult {
        let started = Instant::now();
        let name = target.name.clone();
        let pipeline = TemplatePipeline::new(
            Arc::clone(&self.ctx),
            target,
            self.media.clone(),
            self.cancel_rx.clone(),
        );

        match pipeline.build().await {
            Ok(()) => BuildResult::succeeded(name, started.elapsed()),
            Err(e) => BuildResult::failed(name, e.to_string(), started.elapsed()),
        }
    }
}

/// Emoji-tagged per-target lines plus totals.
pub fn summary_lines(report: &BuildReport) -> Vec<String> {
    let mut lines = vec!["📊 Build Summary:".to_string()];
    for result in &report.results {
        let duration = Duration::from_millis(result.duration).as_secs();
        match &result.error {
            None if result.success => lines.push(format!("   ✅ {} ({}s)", result.os, duration)),
            Some(error) => lines.push(format!("   ❌ {} ({}s): {}", result.os, duration, error)),
            None => lines.push(format!("   ❌ {} ({}s)", result.os, duration)),
        }
    }
    lines.push(format!(
        "   Total: {}, Successful: {}, Failed: {} in {}s",
        report.summary.total,
        report.summary.successful,
        report.summary.failed,
        Duration::from_millis(report.total_duration).as_secs()
    ));
    lines
}
