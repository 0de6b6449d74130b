//! Extraction from self-extracting archive installers (Windows).
//!
//! The blob is a PE32 self-extracting archive; an external unarchiver
//! unpacks it without running the installer. Patch blobs are unpacked on
//! top with overwrite-on-conflict, then every DLL and bitcode file is
//! collected into one flat store.

use super::{ExtractContext, StoreDirs, gather_store_files};
use crate::tools::{ToolRunner, os_args};
use anyhow::{Context, Result, bail};
use log::info;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

const UNARCHIVER: &str = "7za";
const EXTRACT_DIR: &str = "__extracted";
const STORE_DIR: &str = "DLLs";

pub struct ArchiveExtractor<R: ToolRunner> {
    ctx: ExtractContext<R>,
}

impl<R: ToolRunner> ArchiveExtractor<R> {
    pub(crate) fn new(ctx: ExtractContext<R>) -> Self {
        ArchiveExtractor { ctx }
    }

    pub(crate) fn ctx(&self) -> &ExtractContext<R> {
        &self.ctx
    }

    pub(crate) fn ctx_mut(&mut self) -> &mut ExtractContext<R> {
        &mut self.ctx
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn unpack(&self) -> Result<StoreDirs> {
        let ctx = &self.ctx;
        let spec = &ctx.platform_spec;
        let extract_dir = ctx.staging_root.join(EXTRACT_DIR);
        let store = ctx.staging_root.join(STORE_DIR);

        if !extract_dir.exists() {
            fs::create_dir_all(&extract_dir).with_context(|| {
                format!("failed to create extraction directory {}", extract_dir.display())
            })?;
            let blob = ctx.src_dir.join(&spec.blob);
            ctx.runner.run(
                Path::new(UNARCHIVER),
                &os_args([
                    OsString::from("x"),
                    output_flag(&extract_dir),
                    blob.into_os_string(),
                ]),
            )?;
            for patch in &spec.patches {
                let patch_blob = ctx.src_dir.join(patch);
                ctx.runner.run(
                    Path::new(UNARCHIVER),
                    &os_args([
                        OsString::from("x"),
                        // overwrite on conflict, patches supersede the base
                        OsString::from("-aoa"),
                        output_flag(&extract_dir),
                        patch_blob.into_os_string(),
                    ]),
                )?;
            }
        } else {
            info!("files already extracted at {}, skipping", extract_dir.display());
        }

        if let Some(path) = &ctx.nvtoolsext_path {
            info!("NvToolsExt path: {}", path.display());
            if !path.is_dir() {
                bail!(
                    "NvToolsExt path {} is invalid or inaccessible",
                    path.display()
                );
            }
        }

        if !store.exists() {
            fs::create_dir_all(&store)
                .with_context(|| format!("failed to create store {}", store.display()))?;
            // the bundled runtime environment ships DLLs of its own
            gather_store_files(&extract_dir, &store, &["dll", "bc"], Some("jre"))?;
            if let Some(path) = &ctx.nvtoolsext_path {
                gather_store_files(path, &store, &["dll"], None)?;
            }
        } else {
            info!("store already populated at {}, skipping collection", store.display());
        }

        Ok(StoreDirs::single(store))
    }
}

/// The unarchiver's output flag is glued to its value (`-o<dir>`).
fn output_flag(dir: &Path) -> OsString {
    let mut flag = OsString::from("-o");
    flag.push(dir.as_os_str());
    flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractState, PlatformExtractor};
    use crate::platform::Platform;
    use crate::registry::Registry;
    use crate::tools::MockToolRunner;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn windows_extractor(
        src_dir: &Path,
        staging: &Path,
        nvtoolsext_path: Option<PathBuf>,
        runner: MockToolRunner,
    ) -> PlatformExtractor<MockToolRunner> {
        let registry = Registry::builtin();
        let mut version = registry.version("8.0").unwrap().clone();
        version
            .platforms
            .get_mut(&Platform::Windows)
            .unwrap()
            .nvtoolsext_path = nvtoolsext_path;
        PlatformExtractor::new(Platform::Windows, &version, src_dir, staging, runner).unwrap()
    }

    fn populate_extracted(extract_dir: &Path) {
        let bin = extract_dir.join("CUDAToolkit").join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("cudart64_80.dll"), b"cudart pe").unwrap();
        fs::write(bin.join("nvvm64_31_0.dll"), b"nvvm pe").unwrap();
        fs::write(bin.join("install.log"), b"text").unwrap();
        let libdevice = extract_dir.join("CUDAToolkit").join("nvvm").join("libdevice");
        fs::create_dir_all(&libdevice).unwrap();
        fs::write(libdevice.join("libdevice.compute_20.10.bc"), b"bc").unwrap();
        let jre = extract_dir.join("jre").join("bin");
        fs::create_dir_all(&jre).unwrap();
        fs::write(jre.join("java.dll"), b"jre pe").unwrap();
    }

    #[test]
    fn test_unpack_invokes_unarchiver_and_collects_store() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let staging_path = staging.path().to_path_buf();

        let mut runner = MockToolRunner::new();
        // base blob, then one patch with overwrite
        let base_staging = staging_path.clone();
        runner
            .expect_run()
            .withf(move |program, args| {
                program == Path::new(UNARCHIVER)
                    && args.first() == Some(&OsString::from("x"))
                    && args[1] == output_flag(&base_staging.join(EXTRACT_DIR))
                    && args[2].to_string_lossy().ends_with("cuda_8.0.61_windows-exe")
            })
            .times(1)
            .returning({
                let staging = staging_path.clone();
                move |_, _| {
                    populate_extracted(&staging.join(EXTRACT_DIR));
                    Ok(())
                }
            });
        runner
            .expect_run()
            .withf(|_, args| args.get(1) == Some(&OsString::from("-aoa")))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut extractor = windows_extractor(src.path(), staging.path(), None, runner);
        extractor.extract().unwrap();
        assert_eq!(extractor.state(), ExtractState::Extracted);

        let store = staging.path().join(STORE_DIR);
        assert!(store.join("cudart64_80.dll").is_file());
        assert!(store.join("nvvm64_31_0.dll").is_file());
        assert!(store.join("libdevice.compute_20.10.bc").is_file());
        // excluded runtime subtree and non-library files stay out
        assert!(!store.join("java.dll").exists());
        assert!(!store.join("install.log").exists());
    }

    #[test]
    fn test_unpack_skips_when_already_extracted() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let extract_dir = staging.path().join(EXTRACT_DIR);
        populate_extracted(&extract_dir);

        // no tool invocation expected at all
        let runner = MockToolRunner::new();
        let mut extractor = windows_extractor(src.path(), staging.path(), None, runner);
        extractor.extract().unwrap();

        assert!(staging.path().join(STORE_DIR).join("cudart64_80.dll").is_file());
    }

    #[test]
    fn test_unpack_fills_store_from_preinstalled_location() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        populate_extracted(&staging.path().join(EXTRACT_DIR));
        let nvt = tempdir().unwrap();
        fs::write(nvt.path().join("nvToolsExt64_1.dll"), b"nvtx pe").unwrap();

        let runner = MockToolRunner::new();
        let mut extractor = windows_extractor(
            src.path(),
            staging.path(),
            Some(nvt.path().to_path_buf()),
            runner,
        );
        extractor.extract().unwrap();

        assert!(
            staging
                .path()
                .join(STORE_DIR)
                .join("nvToolsExt64_1.dll")
                .is_file()
        );
    }

    #[test]
    fn test_invalid_preinstalled_location_is_fatal() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        populate_extracted(&staging.path().join(EXTRACT_DIR));

        let runner = MockToolRunner::new();
        let mut extractor = windows_extractor(
            src.path(),
            staging.path(),
            Some(PathBuf::from("/nonexistent/NvToolsExt/bin")),
            runner,
        );
        let err = extractor.extract().unwrap_err().to_string();
        assert!(err.contains("invalid or inaccessible"));
        assert_eq!(extractor.state(), ExtractState::Failed);
    }

    #[test]
    fn test_existing_store_is_not_recollected() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        populate_extracted(&staging.path().join(EXTRACT_DIR));
        let store = staging.path().join(STORE_DIR);
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join("marker.dll"), b"kept").unwrap();

        let runner = MockToolRunner::new();
        let mut extractor = windows_extractor(src.path(), staging.path(), None, runner);
        extractor.extract().unwrap();

        // collection skipped entirely, only the marker is present
        assert!(store.join("marker.dll").is_file());
        assert!(!store.join("cudart64_80.dll").exists());
    }
}
