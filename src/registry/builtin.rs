//! Registry data compiled into the binary.
//!
//! One entry per supported product version, transcribed from the vendor's
//! published download layout. URLs and blob names differ per release; so do
//! the naming templates, because the vendor changed library naming between
//! releases (7.5 ships fixed versioned names, 8.0 ships symlink alias
//! chains on Linux).

use super::{PackageSpec, PlatformSpec, Registry, VersionSpec};
use crate::platform::Platform;
use std::collections::BTreeMap;
use std::path::PathBuf;

// TODO: add 9.0 once its blob names and checksums are transcribed.

pub(super) fn registry() -> Registry {
    Registry {
        versions: BTreeMap::from([
            ("7.5".to_string(), version_7_5()),
            ("8.0".to_string(), version_8_0()),
        ]),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn packages(entries: &[(&str, &[&str])]) -> BTreeMap<String, PackageSpec> {
    entries
        .iter()
        .map(|(name, libs)| {
            (
                name.to_string(),
                PackageSpec {
                    libraries: strings(libs),
                },
            )
        })
        .collect()
}

fn version_7_5() -> VersionSpec {
    VersionSpec {
        base_url: "http://developer.download.nvidia.com/compute/cuda/7.5/Prod/".to_string(),
        installers_url_ext: "local_installers/".to_string(),
        patch_url_ext: String::new(),
        md5_url: "http://developer.download.nvidia.com/compute/cuda/7.5/Prod/docs/sidebar/md5sum.txt"
            .to_string(),
        packages: packages(&[
            ("cudatoolkit", &[]),
            ("cudart", &["cudart"]),
            ("cufft", &["cufft"]),
            ("cublas", &["cublas"]),
            ("cusparse", &["cusparse"]),
            ("cusolver", &["cusolver"]),
            ("curand", &["curand"]),
            ("npp", &["nppc", "nppi", "npps"]),
            ("nvblas", &["nvblas"]),
            ("nvrtc", &["nvrtc", "nvrtc-builtins"]),
            ("nvvm", &["nvvm"]),
            ("cupti", &["cupti"]),
        ]),
        libdevice_versions: strings(&["20.10", "30.10", "35.10", "50.10"]),
        platforms: BTreeMap::from([
            (
                Platform::Linux,
                PlatformSpec {
                    blob: "cuda_7.5.18_linux.run".to_string(),
                    patches: vec![],
                    cuda_lib_template: "lib{}.so.7.5".into(),
                    nvtoolsext_template: None,
                    nvvm_lib_template: "lib{}.so.3.0.0".into(),
                    libdevice_template: "libdevice.compute_{}.bc".into(),
                    symlink_aware: true,
                    nvtoolsext_path: None,
                },
            ),
            (
                Platform::Windows,
                PlatformSpec {
                    blob: "cuda_7.5.18_win10.exe".to_string(),
                    patches: vec![],
                    cuda_lib_template: "{}64_75.dll".into(),
                    nvtoolsext_template: None,
                    nvvm_lib_template: "{}64_30_0.dll".into(),
                    libdevice_template: "libdevice.compute_{}.bc".into(),
                    symlink_aware: false,
                    nvtoolsext_path: None,
                },
            ),
            (
                Platform::Osx,
                PlatformSpec {
                    blob: "cuda_7.5.27_mac.dmg".to_string(),
                    patches: vec![],
                    cuda_lib_template: "lib{}.7.5.dylib".into(),
                    nvtoolsext_template: None,
                    nvvm_lib_template: "lib{}.3.0.0.dylib".into(),
                    libdevice_template: "libdevice.compute_{}.bc".into(),
                    symlink_aware: false,
                    nvtoolsext_path: None,
                },
            ),
        ]),
    }
}

fn version_8_0() -> VersionSpec {
    VersionSpec {
        base_url: "https://developer.nvidia.com/compute/cuda/8.0/Prod2/".to_string(),
        installers_url_ext: "local_installers/".to_string(),
        patch_url_ext: "patches/2/".to_string(),
        md5_url: "https://developer.nvidia.com/compute/cuda/8.0/Prod2/docs/sidebar/md5sum-txt"
            .to_string(),
        packages: packages(&[
            ("cudatoolkit", &[]),
            ("cudart", &["cudart"]),
            ("cufft", &["cufft"]),
            ("cublas", &["cublas"]),
            ("cusparse", &["cusparse"]),
            ("curand", &["curand"]),
            ("cusolver", &["cusolver"]),
            ("npp", &["nppc", "nppi", "npps"]),
            ("nvrtc", &["nvrtc", "nvrtc-builtins"]),
            ("nvblas", &["nvblas"]),
            ("nvgraph", &["nvgraph"]),
            ("cupti", &["cupti"]),
            ("nvtx", &["nvToolsExt"]),
            ("nvvm", &["nvvm"]),
        ]),
        libdevice_versions: strings(&["20.10", "30.10", "35.10", "50.10"]),
        platforms: BTreeMap::from([
            (
                Platform::Linux,
                PlatformSpec {
                    blob: "cuda_8.0.61_375.26_linux-run".to_string(),
                    patches: vec!["cuda_8.0.61.2_linux-run".to_string()],
                    // globs so the symlink alias chains match too
                    cuda_lib_template: "lib{}.so*".into(),
                    nvtoolsext_template: Some("lib{}.so*".into()),
                    nvvm_lib_template: "lib{}.so*".into(),
                    libdevice_template: "libdevice.compute_{}.bc".into(),
                    symlink_aware: true,
                    nvtoolsext_path: None,
                },
            ),
            (
                Platform::Windows,
                PlatformSpec {
                    blob: "cuda_8.0.61_windows-exe".to_string(),
                    patches: vec!["cuda_8.0.61.2_windows-exe".to_string()],
                    cuda_lib_template: "{}64_80.dll".into(),
                    nvtoolsext_template: Some("{}64_1.dll".into()),
                    nvvm_lib_template: "{}64_31_0.dll".into(),
                    libdevice_template: "libdevice.compute_{}.bc".into(),
                    symlink_aware: false,
                    nvtoolsext_path: Some(PathBuf::from(
                        r"c:\Program Files\NVIDIA Corporation\NVToolsExt\bin",
                    )),
                },
            ),
            (
                Platform::Osx,
                PlatformSpec {
                    blob: "cuda_8.0.61_mac-dmg".to_string(),
                    patches: vec!["cuda_8.0.61.2_mac-dmg".to_string()],
                    cuda_lib_template: "lib{}.8.0.dylib".into(),
                    nvtoolsext_template: Some("lib{}.1.dylib".into()),
                    nvvm_lib_template: "lib{}.3.1.0.dylib".into(),
                    libdevice_template: "libdevice.compute_{}.bc".into(),
                    symlink_aware: false,
                    nvtoolsext_path: None,
                },
            ),
        ]),
    }
}
