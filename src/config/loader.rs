//! Environment and profile loading.

use super::{RuntimeContext, ToolConfig, WorkspaceLayout, DEFAULT_MAX_CONCURRENCY};
use crate::error::ConfigError;
use crate::models::{BuildOptions, CloudSettings, ExecutionMode, OutputFormat};
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment markers that select cloud mode when `CLOUD_BUILD` is unset.
pub const CLOUD_MARKERS: [&str; 4] = ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "JENKINS_URL"];

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

/// Detect cloud mode: explicit `CLOUD_BUILD` wins, otherwise any CI marker.
pub fn detect_mode<F>(lookup: &F) -> Result<ExecutionMode, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let cloud = match lookup("CLOUD_BUILD") {
        Some(v) if !v.trim().is_empty() => parse_bool("CLOUD_BUILD", &v)?,
        _ => CLOUD_MARKERS
            .iter()
            .any(|key| lookup(key).map_or(false, |v| !v.trim().is_empty())),
    };

    Ok(if cloud {
        ExecutionMode::Cloud(CloudSettings::default())
    } else {
        ExecutionMode::Local
    })
}

/// Build a `RuntimeContext` from a key lookup. `fallback_root` is used when
/// `TEMPLATE_FORGE_ROOT` is unset.
pub fn context_from_lookup<F>(lookup: F, fallback_root: &Path) -> Result<RuntimeContext, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let root = lookup("TEMPLATE_FORGE_ROOT")
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback_root.to_path_buf());

    let max_concurrency = match lookup("MAX_CONCURRENCY") {
        Some(v) => {
            let n: usize = v
                .trim()
                .parse()
                .map_err(|_| invalid("MAX_CONCURRENCY", &v, "expected a positive integer"))?;
            if n == 0 {
                return Err(invalid("MAX_CONCURRENCY", &v, "must be at least 1"));
            }
            n
        }
        None => DEFAULT_MAX_CONCURRENCY,
    };

    let format = match lookup("PACKER_FORMAT") {
        Some(v) if !v.trim().is_empty() => v
            .parse::<OutputFormat>()
            .map_err(|reason| invalid("PACKER_FORMAT", &v, reason))?,
        _ => OutputFormat::Qcow2,
    };

    // SKIP_VALIDATION is opt-in, CLEANUP is opt-out.
    let skip_validation = lookup("SKIP_VALIDATION").map_or(false, |v| v.trim() == "true");
    let cleanup = lookup("CLEANUP").map_or(true, |v| v.trim() != "false");

    let mode = detect_mode(&lookup)?;

    let defaults = ToolConfig::default();
    let validation_runner = match lookup("VALIDATION_RUNNER") {
        Some(v) if !v.trim().is_empty() => v.split_whitespace().map(String::from).collect(),
        _ => defaults.validation_runner,
    };
    let tools = ToolConfig {
        builder: lookup("PACKER_BIN").unwrap_or(defaults.builder),
        hypervisor: lookup("QEMU_BIN").unwrap_or(defaults.hypervisor),
        accel_device: lookup("KVM_DEVICE")
            .map(PathBuf::from)
            .unwrap_or(defaults.accel_device),
        display_server: lookup("XVFB_BIN").unwrap_or(defaults.display_server),
        validation_runner,
    };

    Ok(RuntimeContext {
        layout: WorkspaceLayout::new(root),
        tools,
        options: BuildOptions {
            output_dir: None,
            format,
            skip_validation,
            cleanup,
            mode,
        },
        max_concurrency,
    })
}

/// One registry endpoint with its API credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryProfile {
    pub name: String,
    pub endpoint: String,
    pub key: String,
    pub secret: String,
}

/// Decode `CLOUDSTACK_PROFILES`: base64 of a JSON array of profiles.
pub fn load_registry_profiles(encoded: Option<&str>) -> Result<Vec<RegistryProfile>, ConfigError> {
    let encoded = encoded
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::ValidationFailed(
                "CLOUDSTACK_PROFILES environment variable not set".to_string(),
            )
        })?;

    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid("CLOUDSTACK_PROFILES", "<redacted>", format!("not base64: {}", e)))?;
    let profiles: Vec<RegistryProfile> = serde_json::from_slice(&raw)?;

    for profile in &profiles {
        if profile.endpoint.is_empty() || profile.key.is_empty() || profile.secret.is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "Profile '{}' must include endpoint, key and secret",
                profile.name
            )));
        }
    }

    Ok(profiles)
}
