//! Platform-specific extraction of vendor installer blobs.
//!
//! Each platform ships the toolkit in a different container: a
//! self-extracting archive on Windows, a silently-runnable installer
//! executable on Linux, a disk image of nested tarballs on macOS. One
//! extractor variant per container format normalizes the unpacked layout
//! into a store directory the resolver works against.

mod archive;
mod diskimage;
mod runfile;

pub use archive::ArchiveExtractor;
pub use diskimage::DiskImageExtractor;
pub use runfile::RunfileExtractor;

use crate::copier;
use crate::platform::Platform;
use crate::registry::{NVTX_PACKAGE, NVVM_PACKAGE, PlatformSpec, TOOLKIT_PACKAGE, VersionSpec};
use crate::resolve::{ResolvedArtifact, resolve_libraries};
use crate::tools::ToolRunner;
use anyhow::{Context, Result, ensure};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Environment override for a pre-installed NvToolsExt location.
pub const NVTOOLSEXT_PATH_VAR: &str = "NVTOOLSEXT_INSTALL_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractState {
    Unextracted,
    Extracting,
    Extracted,
    Failed,
}

/// Where the normalized store keeps each artifact family.
///
/// On Windows and macOS everything is flattened into one directory; the
/// Linux installer keeps its own layout, so the three point at different
/// subdirectories there.
#[derive(Debug, Clone)]
pub struct StoreDirs {
    /// General run-time libraries (and tools-extension DLLs).
    pub libraries: PathBuf,
    /// The bitcode-compiler library.
    pub nvvm: PathBuf,
    /// The versioned `libdevice` bitcode files.
    pub libdevice: PathBuf,
}

impl StoreDirs {
    fn single(store: PathBuf) -> Self {
        StoreDirs {
            libraries: store.clone(),
            nvvm: store.clone(),
            libdevice: store,
        }
    }
}

/// State shared by all extractor variants: the configuration slice for one
/// (version, platform) pair, the blob source directory, and the staging
/// root this extractor exclusively owns for the lifetime of one build.
pub(crate) struct ExtractContext<R: ToolRunner> {
    pub(crate) runner: R,
    pub(crate) version: VersionSpec,
    pub(crate) platform_spec: PlatformSpec,
    pub(crate) src_dir: PathBuf,
    pub(crate) staging_root: PathBuf,
    pub(crate) nvtoolsext_path: Option<PathBuf>,
    state: ExtractState,
    store: Option<StoreDirs>,
}

impl<R: ToolRunner> ExtractContext<R> {
    fn resolve_package(&self, pkg: &str) -> Result<Vec<ResolvedArtifact>> {
        ensure!(
            self.state == ExtractState::Extracted,
            "cannot resolve `{}`: extraction has not completed (state {:?})",
            pkg,
            self.state
        );
        if pkg == TOOLKIT_PACKAGE {
            // The umbrella package carries no library files of its own.
            return Ok(Vec::new());
        }
        let dirs = self
            .store
            .as_ref()
            .context("no store directory recorded for this extraction")?;
        let plt = &self.platform_spec;
        let pkg_spec = self.version.package(pkg)?;

        let artifacts = match pkg {
            NVTX_PACKAGE => {
                let template = plt.nvtoolsext_template.as_ref().with_context(|| {
                    format!("no tools-extension naming template configured for `{}`", pkg)
                })?;
                resolve_libraries(&pkg_spec.libraries, &dirs.libraries, template, plt.symlink_aware)?
            }
            NVVM_PACKAGE => {
                // Two independent groups: the compiler library itself plus
                // the bitcode files keyed by device-target version.
                let mut artifacts = resolve_libraries(
                    &pkg_spec.libraries,
                    &dirs.nvvm,
                    &plt.nvvm_lib_template,
                    plt.symlink_aware,
                )?;
                artifacts.extend(resolve_libraries(
                    &self.version.libdevice_versions,
                    &dirs.libdevice,
                    &plt.libdevice_template,
                    plt.symlink_aware,
                )?);
                artifacts
            }
            _ => resolve_libraries(
                &pkg_spec.libraries,
                &dirs.libraries,
                &plt.cuda_lib_template,
                plt.symlink_aware,
            )?,
        };
        Ok(artifacts)
    }
}

/// The closed set of extractor variants, one per vendor container format.
pub enum PlatformExtractor<R: ToolRunner> {
    Archive(ArchiveExtractor<R>),
    Runfile(RunfileExtractor<R>),
    DiskImage(DiskImageExtractor<R>),
}

impl<R: ToolRunner> PlatformExtractor<R> {
    /// Build the extractor for `platform`, owning `staging_root`.
    pub fn new(
        platform: Platform,
        version: &VersionSpec,
        src_dir: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
        runner: R,
    ) -> Result<Self> {
        let platform_spec = version.platform(platform)?.clone();
        let nvtoolsext_path = std::env::var_os(NVTOOLSEXT_PATH_VAR)
            .map(PathBuf::from)
            .or_else(|| platform_spec.nvtoolsext_path.clone());
        let ctx = ExtractContext {
            runner,
            version: version.clone(),
            platform_spec,
            src_dir: src_dir.into(),
            staging_root: staging_root.into(),
            nvtoolsext_path,
            state: ExtractState::Unextracted,
            store: None,
        };
        Ok(match platform {
            Platform::Windows => PlatformExtractor::Archive(ArchiveExtractor::new(ctx)),
            Platform::Linux => PlatformExtractor::Runfile(RunfileExtractor::new(ctx)),
            Platform::Osx => PlatformExtractor::DiskImage(DiskImageExtractor::new(ctx)),
        })
    }

    fn ctx(&self) -> &ExtractContext<R> {
        match self {
            PlatformExtractor::Archive(e) => e.ctx(),
            PlatformExtractor::Runfile(e) => e.ctx(),
            PlatformExtractor::DiskImage(e) => e.ctx(),
        }
    }

    fn ctx_mut(&mut self) -> &mut ExtractContext<R> {
        match self {
            PlatformExtractor::Archive(e) => e.ctx_mut(),
            PlatformExtractor::Runfile(e) => e.ctx_mut(),
            PlatformExtractor::DiskImage(e) => e.ctx_mut(),
        }
    }

    pub fn state(&self) -> ExtractState {
        self.ctx().state
    }

    /// Unpack the vendor blob(s) into the staging root and record the store
    /// layout. Work that already exists on disk is skipped file-by-file;
    /// destructive cleanup of a stale staging tree is the caller's business.
    #[tracing::instrument(skip(self))]
    pub fn extract(&mut self) -> Result<()> {
        self.ctx_mut().state = ExtractState::Extracting;
        let outcome = match self {
            PlatformExtractor::Archive(e) => e.unpack(),
            PlatformExtractor::Runfile(e) => e.unpack(),
            PlatformExtractor::DiskImage(e) => e.unpack(),
        };
        match outcome {
            Ok(store) => {
                let ctx = self.ctx_mut();
                ctx.store = Some(store);
                ctx.state = ExtractState::Extracted;
                Ok(())
            }
            Err(e) => {
                self.ctx_mut().state = ExtractState::Failed;
                Err(e)
            }
        }
    }

    /// Resolve the package's logical library names against the store.
    pub fn resolve_package(&self, pkg: &str) -> Result<Vec<ResolvedArtifact>> {
        self.ctx().resolve_package(pkg)
    }

    /// Resolve and replicate the package's artifacts into `output_dir`.
    #[tracing::instrument(skip(self, output_dir))]
    pub fn materialize(&self, pkg: &str, output_dir: &Path) -> Result<()> {
        let artifacts = self.resolve_package(pkg)?;
        if artifacts.is_empty() {
            debug!("package `{}` carries no library files, nothing to copy", pkg);
            return Ok(());
        }
        copier::materialize(&artifacts, output_dir)
    }
}

/// Mark an installer blob executable so it can be invoked directly.
pub(crate) fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("failed to mark {} executable", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

pub(crate) fn matches_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
        .unwrap_or(false)
}

/// Walk `source_root` and copy every file with one of `extensions` into the
/// flat `store`, first occurrence winning. Subtrees with a path component
/// containing `exclude_component` are skipped (bundled runtime environments
/// ship same-extension files that must not be collected).
#[tracing::instrument(skip(source_root, store))]
pub(crate) fn gather_store_files(
    source_root: &Path,
    store: &Path,
    extensions: &[&str],
    exclude_component: Option<&str>,
) -> Result<()> {
    for entry in WalkDir::new(source_root).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("failed to walk {}", source_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let (Some(excluded), Some(parent)) = (exclude_component, path.parent()) {
            if parent
                .components()
                .any(|c| c.as_os_str().to_string_lossy().contains(excluded))
            {
                continue;
            }
        }
        if !matches_extension(path, extensions) {
            continue;
        }
        let dest = store.join(entry.file_name());
        if dest.exists() {
            continue;
        }
        match fs::copy(path, &dest) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                // Vendor installers are known to ship read-only files that
                // refuse the copy.
                warn!(
                    "permission denied copying {} into {}: {}; clear the read-only \
                     attribute and re-run",
                    path.display(),
                    store.display(),
                    e
                );
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to copy {} into {}", path.display(), store.display())
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::tools::MockToolRunner;
    use tempfile::tempdir;

    fn linux_extractor(
        src_dir: &Path,
        staging: &Path,
        runner: MockToolRunner,
    ) -> PlatformExtractor<MockToolRunner> {
        let registry = Registry::builtin();
        let version = registry.version("8.0").unwrap();
        PlatformExtractor::new(Platform::Linux, version, src_dir, staging, runner).unwrap()
    }

    #[test]
    fn test_resolve_before_extract_is_an_error() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let extractor = linux_extractor(src.path(), staging.path(), MockToolRunner::new());
        assert_eq!(extractor.state(), ExtractState::Unextracted);

        let err = extractor.resolve_package("cudart").unwrap_err().to_string();
        assert!(err.contains("extraction has not completed"));
    }

    #[test]
    fn test_failed_tool_marks_extractor_failed() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        // blob must exist so it can be marked executable
        std::fs::write(src.path().join("cuda_8.0.61_375.26_linux-run"), b"").unwrap();
        std::fs::write(src.path().join("cuda_8.0.61.2_linux-run"), b"").unwrap();

        let mut runner = MockToolRunner::new();
        runner.expect_run().returning(|program, _| {
            Err(crate::error::ToolError::Spawn {
                program: program.display().to_string(),
                source: std::io::Error::from(ErrorKind::NotFound),
            })
        });

        let mut extractor = linux_extractor(src.path(), staging.path(), runner);
        assert!(extractor.extract().is_err());
        assert_eq!(extractor.state(), ExtractState::Failed);
    }

    #[test]
    fn test_gather_store_files_filters_and_excludes() {
        let src = tempdir().unwrap();
        let store = tempdir().unwrap();
        let nested = src.path().join("bin").join("x64");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("cudart64_80.dll"), b"pe").unwrap();
        fs::write(nested.join("notes.txt"), b"text").unwrap();
        let jre = src.path().join("jre").join("bin");
        fs::create_dir_all(&jre).unwrap();
        fs::write(jre.join("java.dll"), b"jre pe").unwrap();
        let devices = src.path().join("nvvm").join("libdevice");
        fs::create_dir_all(&devices).unwrap();
        fs::write(devices.join("libdevice.compute_20.10.bc"), b"bc").unwrap();

        gather_store_files(src.path(), store.path(), &["dll", "bc"], Some("jre")).unwrap();

        assert!(store.path().join("cudart64_80.dll").is_file());
        assert!(store.path().join("libdevice.compute_20.10.bc").is_file());
        assert!(!store.path().join("java.dll").exists());
        assert!(!store.path().join("notes.txt").exists());
    }

    #[test]
    fn test_gather_store_files_first_occurrence_wins() {
        let src = tempdir().unwrap();
        let store = tempdir().unwrap();
        let a = src.path().join("a");
        let b = src.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("cufft64_80.dll"), b"first").unwrap();
        fs::write(b.join("cufft64_80.dll"), b"second").unwrap();

        gather_store_files(src.path(), store.path(), &["dll"], None).unwrap();
        assert_eq!(fs::read(store.path().join("cufft64_80.dll")).unwrap(), b"first");
    }

    #[test]
    fn test_matches_extension_case_insensitive() {
        assert!(matches_extension(Path::new("a/CUDART64_80.DLL"), &["dll"]));
        assert!(matches_extension(Path::new("libdevice.compute_20.10.bc"), &["dll", "bc"]));
        assert!(!matches_extension(Path::new("readme"), &["dll"]));
    }
}
