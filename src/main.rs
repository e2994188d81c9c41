use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use template_forge::config::load_registry_profiles;
use template_forge::media::UrlChecker;
use template_forge::orchestrator::cleanup::{clean_global, clean_target};
use template_forge::orchestrator::executor::validate_for_report;
use template_forge::registry::{publish, TemplateManifest};
use template_forge::report::{build_report_age, save_validation_report};
use template_forge::status::render_table;
use template_forge::system::CancelSignal;
use template_forge::{
    BatchScheduler, BuildError, CleanScope, ExecutionMode, LogCollector, OutputFormat, RuntimeContext,
    StatusReporter, TargetCatalog, WorkspaceLayout,
};

#[derive(Parser)]
#[command(name = "template-forge")]
#[command(author, version, about = "Build and publish VM templates for supported Linux distributions")]
struct Cli {
    /// Workspace root (defaults to TEMPLATE_FORGE_ROOT or the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Default)]
struct BuildFlags {
    /// Output image format: qcow2, vhd or ova
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Directory for the built image (default: templates/<os>/output)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Skip the post-build validation step
    #[arg(long)]
    skip_validation: bool,

    /// Keep builder caches after a successful build
    #[arg(long)]
    no_cleanup: bool,

    /// Force cloud mode (retries, headless display, builder log capture)
    #[arg(long)]
    cloud: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one target, or `all`
    Build {
        target: String,

        #[command(flatten)]
        flags: BuildFlags,
    },
    /// Build every target in windows of --concurrency
    BuildAll {
        /// Pipelines per window (default: MAX_CONCURRENCY or 3)
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        flags: BuildFlags,
    },
    /// Remove downloaded media, outputs or caches
    Clean {
        target: Option<String>,
        /// Remove downloaded media
        #[arg(long)]
        iso: bool,
        /// Remove build outputs
        #[arg(long)]
        output: bool,
        /// Remove builder caches (default)
        #[arg(long)]
        cache: bool,
        /// Remove everything
        #[arg(long)]
        all: bool,
    },
    /// Show build status derived from the workspace
    Status {
        target: Option<String>,

        /// Only consider artifacts of this format
        #[arg(long)]
        format: Option<OutputFormat>,
    },
    /// Run validation procedures and write validation-report.json
    Validate { target: Option<String> },
    /// Check that media URLs answer a HEAD request
    CheckUrls { target: Option<String> },
    /// Register a built template with the image registry
    Publish {
        /// Template name
        #[arg(short, long)]
        name: String,
        /// Template download URL
        #[arg(short, long)]
        url: String,
        /// Builder manifest with custom_data tags
        #[arg(short, long)]
        manifest: PathBuf,
        /// Only publish to this profile
        #[arg(short, long)]
        profile: Option<String>,
    },
}

fn apply_flags(ctx: &mut RuntimeContext, flags: &BuildFlags) {
    if let Some(format) = flags.format {
        ctx.options.format = format;
    }
    if let Some(dir) = &flags.output_dir {
        ctx.options.output_dir = Some(dir.clone());
    }
    if flags.skip_validation {
        ctx.options.skip_validation = true;
    }
    if flags.no_cleanup {
        ctx.options.cleanup = false;
    }
    if flags.cloud && !ctx.options.mode.is_cloud() {
        ctx.options.mode = ExecutionMode::Cloud(Default::default());
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut ctx = match RuntimeContext::from_env() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(root) = &cli.root {
        ctx.layout = WorkspaceLayout::new(root.clone());
    }

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let collector = match LogCollector::new(ctx.layout.logs_dir(), true) {
        Ok(collector) => {
            let collector = collector.with_level(level);
            if let Err(e) = collector.install_global() {
                eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
            }
            Some(collector)
        }
        Err(e) => {
            eprintln!("[Main] WARNING: LogCollector initialization failed: {}", e);
            None
        }
    };
    log::info!("[Main] template-forge {} in {}", template_forge::VERSION, ctx.layout.root().display());

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[Main] [CANCEL] Interrupt received, stopping after running steps are terminated");
            let _ = cancel_tx.send(true);
        }
    });

    let code = match run(cli.command, ctx, cancel_rx).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("[Main] {:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    };

    if let Some(collector) = collector {
        let _ = collector.wait_for_empty().await;
    }
    code
}

/// Returns whether everything the command attempted succeeded.
async fn run(command: Commands, mut ctx: RuntimeContext, cancel_rx: CancelSignal) -> anyhow::Result<bool> {
    let catalog = TargetCatalog::load(ctx.layout.root()).context("loading target catalog")?;

    match command {
        Commands::Build { target, flags } => {
            apply_flags(&mut ctx, &flags);
            let targets = resolve(&catalog, Some(target.as_str()))?;
            let limit = ctx.max_concurrency;
            build(ctx, &targets, limit, cancel_rx).await
        }
        Commands::BuildAll { concurrency, flags } => {
            apply_flags(&mut ctx, &flags);
            let limit = concurrency.unwrap_or(ctx.max_concurrency).max(1);
            let targets = catalog.all().to_vec();
            build(ctx, &targets, limit, cancel_rx).await
        }
        Commands::Clean { target, iso, output, cache, all } => {
            let targets = resolve(&catalog, target.as_deref())?;
            let scope = CleanScope::from_flags(iso, output, cache, all);
            println!(
                "🧹 Cleaning {} target(s) (iso: {}, output: {}, cache: {})",
                targets.len(),
                scope.iso,
                scope.output,
                scope.cache
            );
            for t in &targets {
                for path in clean_target(&ctx.layout, &t.name, scope)? {
                    println!("   ✅ Removed {}", path.display());
                }
            }
            for path in clean_global(&ctx.layout)? {
                println!("✅ Removed global file: {}", path.display());
            }
            println!("🎉 Cleanup completed!");
            Ok(true)
        }
        Commands::Status { target, format } => {
            let targets = resolve(&catalog, target.as_deref())?;
            let reporter = match format {
                Some(format) => {
                    ctx.options.format = format;
                    StatusReporter::new(&ctx)
                }
                None => StatusReporter::any_format(&ctx),
            };
            let statuses = reporter.statuses(targets.iter().map(|t| t.name.as_str()));
            println!("📊 Template Status");
            println!("{}", "=".repeat(50));
            print!("{}", render_table(&statuses));
            if let Some(age) = build_report_age(&ctx.layout) {
                if age.as_secs() < 24 * 3600 {
                    println!(
                        "\n📋 Recent build report available ({} min old): {}",
                        age.as_secs() / 60,
                        ctx.layout.build_report_path().display()
                    );
                }
            }
            Ok(true)
        }
        Commands::Validate { target } => {
            let targets = resolve(&catalog, target.as_deref())?;
            let mut cancel = cancel_rx;
            let mut results = Vec::with_capacity(targets.len());
            for t in &targets {
                println!("🧪 Validating {} template...", t.name);
                let result = validate_for_report(&ctx, t, &mut cancel).await;
                match &result.error {
                    None => println!("   ✅ {}", t.name),
                    Some(e) => println!("   ❌ {}: {}", t.name, e),
                }
                results.push(result);
            }
            let report = template_forge::models::ValidationReport::new(results);
            save_validation_report(&ctx.layout, &report)?;
            println!(
                "📊 Validation: {} total, {} passed, {} failed",
                report.summary.total, report.summary.successful, report.summary.failed
            );
            Ok(report.summary.failed == 0)
        }
        Commands::CheckUrls { target } => {
            let targets = resolve(&catalog, target.as_deref())?;
            println!("🔍 Checking {} media URL(s)...", targets.len());
            let checker = UrlChecker::new(ctx.options.mode.http_timeouts())?;
            let results = checker.check_all(&targets).await;

            let unreachable: Vec<_> = results.iter().filter(|r| !r.reachable).collect();
            for result in &results {
                if result.reachable {
                    println!("   ✅ {}: {}", result.name, result.url);
                }
            }
            if unreachable.is_empty() {
                println!("✅ All media URLs are reachable");
                return Ok(true);
            }
            println!("❌ Unreachable media URLs:");
            for result in &unreachable {
                println!(
                    "   - {}: {} ({})",
                    result.name,
                    result.url,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(false)
        }
        Commands::Publish { name, url, manifest, profile } => {
            let encoded = std::env::var("CLOUDSTACK_PROFILES").ok();
            let profiles = load_registry_profiles(encoded.as_deref()).map_err(BuildError::from)?;
            let manifest = TemplateManifest::load(&manifest).map_err(BuildError::from)?;
            let outcomes = publish(&profiles, profile.as_deref(), &name, &url, &manifest).await?;

            let mut ok = true;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(id) => println!("✅ {}: registered \"{}\" as {}", outcome.profile, name, id),
                    Err(e) => {
                        ok = false;
                        println!("❌ {}: {}", outcome.profile, e);
                    }
                }
            }
            Ok(ok)
        }
    }
}

fn resolve(
    catalog: &TargetCatalog,
    selector: Option<&str>,
) -> anyhow::Result<Vec<template_forge::TargetConfig>> {
    match catalog.resolve(selector) {
        Ok(targets) => Ok(targets),
        Err(e) => bail!("{}\nAvailable: {}", e, catalog.available_list()),
    }
}

async fn build(
    ctx: RuntimeContext,
    targets: &[template_forge::TargetConfig],
    limit: usize,
    cancel_rx: CancelSignal,
) -> anyhow::Result<bool> {
    println!(
        "🚀 Building {} template(s) ({} mode, format {}, {} at a time)",
        targets.len(),
        ctx.options.mode.as_str(),
        ctx.options.format,
        limit
    );
    let scheduler = BatchScheduler::new(Arc::new(ctx), cancel_rx)?;
    let report = scheduler.run_all(targets, limit).await?;

    for line in template_forge::orchestrator::scheduler::summary_lines(&report) {
        println!("{}", line);
    }
    Ok(report.all_succeeded())
}
