//! Build Driver and Artifact Validator.
//!
//! Both drive external processes through [`run_logged`], so their output lands
//! in the session log and the last lines are available when they fail.

use crate::config::RuntimeContext;
use crate::error::BuildError;
use crate::models::{ExecutionMode, TargetConfig, ValidationResult};
use crate::system::{run_logged, CancelSignal, LogTail, ProcessOutput, DEFAULT_TAIL_LINES};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Lines in builder output that name the actual failure.
static BUILDER_ERROR_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(build '.*' errored|==> .*error|^error:|\berror\b.*)").ok()
});

/// Lines of validator output kept as report details.
const VALIDATION_DETAIL_LINES: usize = 500;

/// Assemble the builder command for `target`. Output location and format go
/// through the environment, never through flags.
pub fn builder_command(ctx: &RuntimeContext, target: &TargetConfig, template: &Path) -> Command {
    let work_dir = ctx.layout.work_dir(&target.name);
    let output_dir = ctx.output_dir(&target.name);

    let mut command = Command::new(&ctx.tools.builder);
    command.arg("build");
    if ctx.options.mode.is_cloud() {
        command.arg("-force").arg("-timestamp-ui");
    }
    command.arg(template);
    command.current_dir(&work_dir);

    command.env("PACKER_OUTPUT_DIR", &output_dir);
    command.env("PACKER_FORMAT", ctx.options.format.as_str());

    if let ExecutionMode::Cloud(settings) = &ctx.options.mode {
        command.env("PACKER_LOG", "1");
        command.env("PACKER_LOG_PATH", ctx.layout.builder_log_path(&target.name));
        command.env("HEADLESS", "true");
        command.env("DISPLAY", &settings.display);
    }
    command
}

/// Run the external builder for one target.
///
/// In cloud mode the virtual display named by `DISPLAY` is owned by the
/// scheduler and shared by every pipeline of the run.
pub async fn run_build(
    ctx: &RuntimeContext,
    target: &TargetConfig,
    media: &Path,
    cancel: &mut CancelSignal,
) -> Result<(), BuildError> {
    let template = ctx.layout.template_path(target);
    if !template.exists() {
        return Err(BuildError::TemplateNotFound(template.display().to_string()));
    }

    log::info!(
        "[Build] [{}] Running {} against {} (media: {}, format: {}, output: {})",
        target.name,
        ctx.tools.builder,
        template.display(),
        media.display(),
        ctx.options.format,
        ctx.output_dir(&target.name).display()
    );

    let command = builder_command(ctx, target, &template);
    let label = format!("packer:{}", target.name);
    let output = run_logged(command, &label, DEFAULT_TAIL_LINES, cancel)
        .await
        .map_err(|e| match e {
            BuildError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                BuildError::ToolNotFound {
                    tool: ctx.tools.builder.clone(),
                    detail: source.to_string(),
                }
            }
            other => other,
        })?;

    if output.success {
        log::info!("[Build] [{}] Builder finished successfully", target.name);
        return Ok(());
    }

    let tail = failure_tail(ctx, target, &output);
    if ctx.options.mode.is_cloud() {
        log::error!("[Build] [{}] Last {} builder log lines:", target.name, tail.len());
        for line in &tail {
            log::error!("[Build] [{}] | {}", target.name, line);
        }
    }

    Err(BuildError::BuildToolFailed {
        code: output.code,
        message: summarize_failure(&tail, output.code),
        tail,
    })
}

/// In cloud mode the builder writes its own log file; prefer its tail when present.
fn failure_tail(ctx: &RuntimeContext, target: &TargetConfig, output: &ProcessOutput) -> Vec<String> {
    if ctx.options.mode.is_cloud() {
        let log_path = ctx.layout.builder_log_path(&target.name);
        match LogTail::from_file(&log_path, DEFAULT_TAIL_LINES) {
            Ok(tail) if !tail.is_empty() => return tail.lines(),
            Ok(_) => {}
            Err(e) => log::debug!("[Build] No builder log at {}: {}", log_path.display(), e),
        }
    }
    output.tail.lines()
}

/// One-line cause: the last error-looking line, or the exit status.
pub fn summarize_failure(tail: &[String], code: Option<i32>) -> String {
    let from_output = BUILDER_ERROR_LINE.as_ref().and_then(|re| {
        tail.iter()
            .rev()
            .find(|line| re.is_match(line))
            .map(|line| line.trim().to_string())
    });

    match (from_output, code) {
        (Some(line), _) => line,
        (None, Some(code)) => format!("builder exited with code {}", code),
        (None, None) => "builder terminated by signal".to_string(),
    }
}

/// What the pipeline's validation step did.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Passed(Vec<String>),
    /// No validation procedure exists for the target.
    Skipped(PathBuf),
}

fn validation_command(ctx: &RuntimeContext, target: &TargetConfig, script: &Path) -> Result<Command, BuildError> {
    let (program, args) = ctx.tools.validation_runner.split_first().ok_or_else(|| {
        BuildError::ConfigurationInvalid("validation runner command is empty".to_string())
    })?;

    let mut command = Command::new(program);
    command.args(args).arg(script);
    command.current_dir(ctx.layout.root());
    command.env("TEMPLATE_NAME", &target.name);
    command.env("TEMPLATE_ARTIFACT", ctx.artifact_path(&target.name));
    Ok(command)
}

async fn run_validation_script(
    ctx: &RuntimeContext,
    target: &TargetConfig,
    script: &Path,
    cancel: &mut CancelSignal,
) -> Result<ProcessOutput, BuildError> {
    let command = validation_command(ctx, target, script)?;
    let label = format!("validate:{}", target.name);
    run_logged(command, &label, VALIDATION_DETAIL_LINES, cancel).await
}

/// Pipeline validation step: a missing procedure is skipped, a failing one is `ValidationFailed`.
pub async fn validate_artifact(
    ctx: &RuntimeContext,
    target: &TargetConfig,
    cancel: &mut CancelSignal,
) -> Result<ValidationOutcome, BuildError> {
    let script = ctx.layout.validation_script(target);
    if !script.exists() {
        log::warn!(
            "[Validate] [{}] No validation script at {}, skipping validation",
            target.name,
            script.display()
        );
        return Ok(ValidationOutcome::Skipped(script));
    }

    log::info!("[Validate] [{}] Running {}", target.name, script.display());
    let output = run_validation_script(ctx, target, &script, cancel).await?;
    if output.success {
        log::info!("[Validate] [{}] Validation passed", target.name);
        Ok(ValidationOutcome::Passed(output.tail.lines()))
    } else {
        let last = output.tail.lines().last().cloned().unwrap_or_default();
        Err(BuildError::ValidationFailed(format!(
            "{} exited with {:?}: {}",
            script.display(),
            output.code,
            last
        )))
    }
}

/// Standalone validation command: a missing procedure counts as a failure.
pub async fn validate_for_report(
    ctx: &RuntimeContext,
    target: &TargetConfig,
    cancel: &mut CancelSignal,
) -> ValidationResult {
    let script = ctx.layout.validation_script(target);
    if !script.exists() {
        return ValidationResult {
            os: target.name.clone(),
            success: false,
            error: Some(format!("Validation script not found: {}", script.display())),
            details: Vec::new(),
        };
    }

    match run_validation_script(ctx, target, &script, cancel).await {
        Ok(output) => {
            let details: Vec<String> = output
                .tail
                .lines()
                .into_iter()
                .filter(|line| !line.trim().is_empty())
                .collect();
            let error = if output.success {
                None
            } else {
                Some(format!(
                    "validation exited with {}",
                    output.code.map_or("signal".to_string(), |c| c.to_string())
                ))
            };
            ValidationResult {
                os: target.name.clone(),
                success: output.success,
                error,
                details,
            }
        }
        Err(e) => ValidationResult {
            os: target.name.clone(),
            success: false,
            error: Some(format!("Validation failed: {}", e)),
            details: Vec::new(),
        },
    }
}
