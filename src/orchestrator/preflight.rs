//! Environment Prober
//!
//! Runs before any network or builder work: required tools must be present
//! and the target's directories must exist.

use crate::config::RuntimeContext;
use crate::error::BuildError;
use crate::models::TargetConfig;
use crate::system::probe_tool;
use std::path::Path;

/// Outcome of a successful probe. Warnings are non-fatal findings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub builder_version: String,
    pub hypervisor_version: String,
    pub warnings: Vec<String>,
}

/// Check tools and prepare directories for `target`.
///
/// A missing builder or hypervisor is `ToolNotFound`. In cloud mode a missing
/// acceleration device only produces a warning: software emulation still works.
pub async fn probe(ctx: &RuntimeContext, target: &TargetConfig) -> Result<ProbeReport, BuildError> {
    log::info!("[Preflight] [{}] Validating build environment ({} mode)", target.name, ctx.options.mode.as_str());

    let mut report = ProbeReport {
        builder_version: probe_tool(&ctx.tools.builder).await?,
        hypervisor_version: probe_tool(&ctx.tools.hypervisor).await?,
        warnings: Vec::new(),
    };
    log::debug!(
        "[Preflight] builder: {:?}, hypervisor: {:?}",
        report.builder_version,
        report.hypervisor_version
    );

    if ctx.options.mode.is_cloud() && !ctx.tools.accel_device.exists() {
        let warning = format!(
            "{} not available, builds will fall back to software emulation",
            ctx.tools.accel_device.display()
        );
        log::warn!("[Preflight] [WARN] {}", warning);
        report.warnings.push(warning);
    }

    ensure_dir(&ctx.layout.work_dir(&target.name))?;
    ensure_dir(&ctx.output_dir(&target.name))?;
    if ctx.options.mode.is_cloud() {
        ensure_dir(&ctx.layout.default_output_dir(&target.name))?;
        ensure_dir(&ctx.layout.http_dir(&target.name))?;
    }

    log::info!("[Preflight] [{}] Environment OK", target.name);
    Ok(report)
}

fn ensure_dir(path: &Path) -> Result<(), BuildError> {
    std::fs::create_dir_all(path).map_err(|e| BuildError::io(path, e))
}
