//! Unified error type hierarchy for Template Forge
//!
//! Provides structured error handling with BuildError (pipeline failures),
//! ConfigError (environment, catalog and profile parsing) and RegistryError
//! (image registry publishing).

use std::io;
use thiserror::Error;

/// Template build pipeline errors.
///
/// Every variant is caught at the pipeline boundary and recorded as a failed
/// `BuildResult`; none of them escape the batch scheduler.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Required tool not found: {tool} ({detail})")]
    ToolNotFound { tool: String, detail: String },

    #[error("Media acquisition failed after {attempts} attempt(s): {source}")]
    MediaAcquisitionFailed {
        attempts: u32,
        #[source]
        source: Box<BuildError>,
    },

    #[error("Checksum mismatch for {path}. Expected: {expected}, Got: {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Builder template not found: {0}")]
    TemplateNotFound(String),

    #[error("Builder failed (exit code {code:?}): {message}")]
    BuildToolFailed {
        code: Option<i32>,
        message: String,
        tail: Vec<String>,
    },

    #[error("Template validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Invalid pipeline transition: {0}")]
    InvalidTransition(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        BuildError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// True when the error came from the cancellation signal rather than a real failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            BuildError::Cancelled => true,
            BuildError::MediaAcquisitionFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Environment, catalog and profile parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in {path}: {source}")]
    InvalidToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        BuildError::ConfigurationInvalid(e.to_string())
    }
}

/// Image registry client errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("Registry API error {code}: {text}")]
    Api { code: i64, text: String },

    #[error("Unexpected registry response: {0}")]
    UnexpectedResponse(String),

    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),
}

/// Top-level result type for glue code that mixes error families.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
