//! Target Catalog
//!
//! Maps target identifiers to their installation media, checksums and the
//! per-distribution template/script names. The built-in table can be
//! overridden per target from a `targets.toml` file in the workspace root,
//! so mirrors and checksums can be re-pinned without touching code.

use crate::error::{BuildError, ConfigError};
use crate::media::checksum::PLACEHOLDER_CHECKSUM;
use crate::models::TargetConfig;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the optional override file in the workspace root.
pub const OVERRIDES_FILE: &str = "targets.toml";

fn target(name: &str, version: &str, iso_url: &str, iso_checksum: &str) -> TargetConfig {
    TargetConfig {
        name: name.to_string(),
        version: version.to_string(),
        iso_url: iso_url.to_string(),
        iso_checksum: iso_checksum.to_string(),
        packer_template: format!("{}.pkr.hcl", name),
        preparation_script: format!("{}-prepare.sh", name),
        validation_script: format!("{}-validate.ts", name),
    }
}

static BUILTIN_TARGETS: Lazy<Vec<TargetConfig>> = Lazy::new(|| {
    vec![
        target(
            "ubuntu",
            "22.04",
            "https://releases.ubuntu.com/22.04/ubuntu-22.04.3-live-server-amd64.iso",
            "a4acfda10b18da50e2ec50ccaf860d7f20b389df8765611142305c0e911d16fd",
        ),
        target(
            "almalinux",
            "9",
            "https://repo.almalinux.org/almalinux/9/isos/x86_64/AlmaLinux-9-latest-x86_64-minimal.iso",
            "27a346c74d8755516a4ad2057ea29c2450454f1a928628734f26e12b0b8120d7",
        ),
        target(
            "rockylinux",
            "9",
            "https://download.rockylinux.org/pub/rocky/9/isos/x86_64/Rocky-9-latest-x86_64-minimal.iso",
            "aed9449cf79eb2d1c365f4f2561f923a80451b3e8fdbf595889b4cf0ac6c58b8",
        ),
        target(
            "centos",
            "9-stream",
            "https://mirrors.centos.org/mirrorlist?path=/9-stream/BaseOS/x86_64/iso/CentOS-Stream-9-latest-x86_64-boot.iso&redirect=1&protocol=https",
            "c87a2d81d67bbaeaf646aea5bedd70990078ec252f634796b5b87b721ccd9bdf",
        ),
        // Leap and RHEL media checksums are not pinned yet; the computed value is logged.
        target(
            "suse",
            "15.5",
            "https://download.opensuse.org/distribution/leap/15.5/iso/openSUSE-Leap-15.5-DVD-x86_64-Media.iso",
            PLACEHOLDER_CHECKSUM,
        ),
        target(
            "redhat",
            "9.3",
            "https://access.redhat.com/downloads/content/479/ver=/rhel---9/9.3/x86_64/product-software",
            PLACEHOLDER_CHECKSUM,
        ),
        target(
            "fedora",
            "41",
            "https://download.fedoraproject.org/pub/fedora/linux/releases/41/Server/x86_64/iso/Fedora-Server-netinst-x86_64-41-1.4.iso",
            "630c52ba9e7a7f229b026e241ba74b9bc105e60ba5bf7b222693ae0e25f05c97",
        ),
    ]
});

/// Per-target fields that may be overridden from `targets.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetOverride {
    version: Option<String>,
    iso_url: Option<String>,
    iso_checksum: Option<String>,
}

/// Ordered, immutable set of buildable targets.
#[derive(Debug, Clone)]
pub struct TargetCatalog {
    targets: Vec<TargetConfig>,
}

impl TargetCatalog {
    /// The built-in catalog of supported distributions.
    pub fn builtin() -> Self {
        TargetCatalog {
            targets: BUILTIN_TARGETS.clone(),
        }
    }

    /// Catalog from an explicit list (tests and embedding callers).
    pub fn from_targets(targets: Vec<TargetConfig>) -> Self {
        TargetCatalog { targets }
    }

    /// Built-in catalog with `targets.toml` overrides from `root`, if the file exists.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let mut catalog = Self::builtin();
        let path = root.join(OVERRIDES_FILE);
        if !path.exists() {
            return Ok(catalog);
        }

        let content = std::fs::read_to_string(&path)?;
        let overrides: BTreeMap<String, TargetOverride> =
            toml::from_str(&content).map_err(|source| ConfigError::InvalidToml {
                path: path.display().to_string(),
                source,
            })?;

        for (name, patch) in overrides {
            let entry = catalog
                .targets
                .iter_mut()
                .find(|t| t.name == name)
                .ok_or_else(|| {
                    ConfigError::ValidationFailed(format!(
                        "{} overrides unknown target '{}'",
                        OVERRIDES_FILE, name
                    ))
                })?;
            if let Some(version) = patch.version {
                entry.version = version;
            }
            if let Some(url) = patch.iso_url {
                entry.iso_url = url;
            }
            if let Some(checksum) = patch.iso_checksum {
                entry.iso_checksum = checksum;
            }
            log::debug!("[Catalog] Applied override for '{}'", name);
        }

        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&TargetConfig> {
        let key = name.trim().to_lowercase();
        self.targets.iter().find(|t| t.name == key)
    }

    pub fn names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn all(&self) -> &[TargetConfig] {
        &self.targets
    }

    /// Resolve a CLI selector: `all` (or nothing) expands to every target.
    pub fn resolve(&self, selector: Option<&str>) -> Result<Vec<TargetConfig>, BuildError> {
        match selector.map(str::trim) {
            None | Some("all") => Ok(self.targets.clone()),
            Some(name) => self
                .get(name)
                .cloned()
                .map(|t| vec![t])
                .ok_or_else(|| BuildError::UnknownTarget(name.to_string())),
        }
    }

    /// Human-readable list used in "unknown target" messages.
    pub fn available_list(&self) -> String {
        format!("all, {}", self.names().join(", "))
    }
}
