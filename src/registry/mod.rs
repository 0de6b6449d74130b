//! The version/platform registry: which blobs to fetch, how libraries are
//! named on disk, and which logical libraries each package carries.
//!
//! The registry is loaded once at startup (built-in data or a JSON file) and
//! passed by reference from there on; nothing mutates it afterwards.

mod builtin;
mod template;

pub use template::LibraryTemplate;

use crate::platform::Platform;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The umbrella package covering the whole toolkit. It carries no library
/// files of its own; it is materialized through link scripts instead.
pub const TOOLKIT_PACKAGE: &str = "cudatoolkit";

/// Package whose DLLs follow the tools-extension naming convention rather
/// than the general versioned-library one.
pub const NVTX_PACKAGE: &str = "nvtx";

/// Package shipping both the bitcode-compiler library and the versioned
/// `libdevice` bitcode files.
pub const NVVM_PACKAGE: &str = "nvvm";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    versions: BTreeMap<String, VersionSpec>,
}

/// Configuration for one product version: download locations, the package
/// map, and the per-platform naming/extraction data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSpec {
    pub base_url: String,
    pub installers_url_ext: String,
    pub patch_url_ext: String,
    pub md5_url: String,
    pub packages: BTreeMap<String, PackageSpec>,
    /// Device-target versions of the `libdevice` bitcode files.
    pub libdevice_versions: Vec<String>,
    pub platforms: BTreeMap<Platform, PlatformSpec>,
}

/// The ordered logical library names a package materializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSpec {
    pub libraries: Vec<String>,
}

/// Per-platform blob names and filename templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Name of the vendor installer blob for this platform.
    pub blob: String,
    /// Patch blobs, applied in order after the base blob.
    #[serde(default)]
    pub patches: Vec<String>,
    /// Template for the general run-time libraries.
    pub cuda_lib_template: LibraryTemplate,
    /// Template for the tools-extension DLLs, where the platform ships them.
    #[serde(default)]
    pub nvtoolsext_template: Option<LibraryTemplate>,
    /// Template for the bitcode-compiler library.
    pub nvvm_lib_template: LibraryTemplate,
    /// Template for the versioned `libdevice` bitcode files.
    pub libdevice_template: LibraryTemplate,
    /// Whether libraries on this platform ship as symlink alias chains
    /// (one real file plus aliases) rather than a single exact filename.
    pub symlink_aware: bool,
    /// Default pre-installed location to fill in DLLs the vendor blob does
    /// not carry (Windows NvToolsExt).
    #[serde(default)]
    pub nvtoolsext_path: Option<PathBuf>,
}

impl Registry {
    /// The registry data compiled into the binary.
    pub fn builtin() -> Self {
        builtin::registry()
    }

    /// Assemble a registry from version specs built elsewhere.
    pub fn new(versions: BTreeMap<String, VersionSpec>) -> Self {
        Registry { versions }
    }

    /// Load a registry from a JSON file and validate it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read registry file {}", path.display()))?;
        let registry: Registry = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse registry file {}", path.display()))?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    pub fn version(&self, version: &str) -> Result<&VersionSpec> {
        self.versions.get(version).with_context(|| {
            format!(
                "unknown product version `{}`, known versions: {}",
                version,
                self.versions.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    /// Check the invariants the rest of the pipeline relies on: every
    /// template has exactly one substitution slot, and no two packages of a
    /// version claim the same logical library name.
    pub fn validate(&self) -> Result<()> {
        for (version, spec) in &self.versions {
            let mut claimed: HashMap<&str, &str> = HashMap::new();
            for (pkg, pkg_spec) in &spec.packages {
                if pkg_spec.libraries.is_empty() && pkg != TOOLKIT_PACKAGE {
                    bail!("version {}: package `{}` declares no libraries", version, pkg);
                }
                for lib in &pkg_spec.libraries {
                    if let Some(other) = claimed.insert(lib.as_str(), pkg.as_str()) {
                        bail!(
                            "version {}: library `{}` is claimed by both `{}` and `{}`",
                            version,
                            lib,
                            other,
                            pkg
                        );
                    }
                }
            }
            for (platform, plt) in &spec.platforms {
                let mut templates = vec![
                    ("cuda_lib_template", &plt.cuda_lib_template),
                    ("nvvm_lib_template", &plt.nvvm_lib_template),
                    ("libdevice_template", &plt.libdevice_template),
                ];
                if let Some(t) = &plt.nvtoolsext_template {
                    templates.push(("nvtoolsext_template", t));
                }
                for (field, template) in templates {
                    if template.slot_count() != 1 {
                        bail!(
                            "version {} ({}): {} `{}` must have exactly one substitution slot",
                            version,
                            platform,
                            field,
                            template
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl VersionSpec {
    pub fn platform(&self, platform: Platform) -> Result<&PlatformSpec> {
        self.platforms
            .get(&platform)
            .with_context(|| format!("no configuration for platform `{}`", platform))
    }

    pub fn package(&self, name: &str) -> Result<&PackageSpec> {
        self.packages.get(name).with_context(|| {
            format!(
                "unknown package `{}`, known packages: {}",
                name,
                self.packages.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}
