//! Operating-system detection and per-platform layout constants.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The operating systems NVIDIA ships toolkit installers for.
///
/// Selected once at startup; everything downstream (blob names, naming
/// templates, extraction mechanics) is keyed off this value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    Osx,
}

impl Platform {
    /// Detect the platform of the running process.
    pub fn detect() -> Result<Self> {
        if cfg!(target_os = "linux") {
            Ok(Platform::Linux)
        } else if cfg!(target_os = "windows") {
            Ok(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Ok(Platform::Osx)
        } else {
            bail!("unsupported platform: {}", std::env::consts::OS)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Osx => "osx",
        }
    }

    /// Library directory under the install prefix that downstream packaging
    /// expects the artifacts in.
    pub fn lib_subdir(&self) -> PathBuf {
        match self {
            Platform::Linux | Platform::Osx => PathBuf::from("lib"),
            Platform::Windows => ["Library", "bin"].iter().collect(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
