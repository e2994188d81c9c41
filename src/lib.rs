//! Template Forge
//!
//! Builds validated virtual-machine disk images for a fixed catalog of Linux
//! distributions by driving an external image builder (Packer), and publishes
//! finished images to a CloudStack-style image registry.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures and types
//! - **catalog**: Supported targets and their media
//! - **config**: Runtime context, workspace layout, environment loading
//! - **media**: Media acquisition and integrity verification
//! - **system**: Subprocess execution, tool probing, cancellation
//! - **orchestrator**: Per-target pipeline state machine and batch scheduler
//! - **status**: Filesystem-derived build status
//! - **report**: Atomic JSON reports
//! - **registry**: Signed registry client for publishing templates
//! - **log_collector**: Decoupled on-disk logging

pub mod catalog;
pub mod config;
pub mod error;
pub mod log_collector;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod status;
pub mod system;

// Re-export the log crate for macro usage
pub use log;

pub use catalog::TargetCatalog;
pub use config::{RuntimeContext, ToolConfig, WorkspaceLayout};
pub use error::{BuildError, ConfigError, RegistryError, Result};
pub use log_collector::{LogCollector, LogLine};
pub use media::{MediaAcquirer, MediaSource};
pub use models::{
    BuildOptions, BuildReport, BuildResult, BuildStatus, ExecutionMode, OutputFormat, TargetConfig,
    TemplateStatus,
};
pub use orchestrator::{BatchScheduler, CleanScope, PipelinePhase, TemplatePipeline};
pub use status::StatusReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
