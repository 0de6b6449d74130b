//! Extraction from mountable disk images (macOS).
//!
//! Each image carries nested compressed tarballs. The image is attached at
//! a temporary mount point, walked for tarballs, and only library/bitcode
//! entries are unpacked into a temporary store; the mount point is detached
//! on every exit path before control leaves the mounting scope.

use super::{ExtractContext, StoreDirs, gather_store_files, matches_extension};
use crate::error::ToolError;
use crate::tools::{ToolRunner, os_args};
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::{info, warn};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

const MOUNT_TOOL: &str = "hdiutil";
const TMP_STORE: &str = "tmpstore";
const STORE_DIR: &str = "lib64";

pub struct DiskImageExtractor<R: ToolRunner> {
    ctx: ExtractContext<R>,
}

impl<R: ToolRunner> DiskImageExtractor<R> {
    pub(crate) fn new(ctx: ExtractContext<R>) -> Self {
        DiskImageExtractor { ctx }
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

        let tmpstore = ctx.staging_root.join(TMP_STORE);
        fs::create_dir_all(&tmpstore)
            .with_context(|| format!("failed to create {}", tmpstore.display()))?;
        let store = ctx.staging_root.join(STORE_DIR);
        fs::create_dir_all(&store)
            .with_context(|| format!("failed to create store {}", store.display()))?;

        self.mount_extract(&ctx.src_dir.join(&spec.blob), &tmpstore)?;
        for patch in &spec.patches {
            self.mount_extract(&ctx.src_dir.join(patch), &tmpstore)?;
        }

        gather_store_files(&tmpstore, &store, &["dylib", "bc"], None)?;
        Ok(StoreDirs::single(store))
    }

    /// Attach `image`, unpack library entries from its nested tarballs into
    /// `dest`, detach. Detaching is guaranteed on the error path by the
    /// guard's drop.
    fn mount_extract(&self, image: &Path, dest: &Path) -> Result<()> {
        let mount_point = tempfile::tempdir().context("failed to create mount point")?;
        let guard = MountGuard::attach(&self.ctx.runner, mount_point.path(), image)?;
        unpack_nested_tarballs(mount_point.path(), dest)?;
        guard.detach()?;
        Ok(())
    }
}

struct MountGuard<'a, R: ToolRunner> {
    runner: &'a R,
    mount_point: &'a Path,
    attached: bool,
}

impl<'a, R: ToolRunner> MountGuard<'a, R> {
    fn attach(runner: &'a R, mount_point: &'a Path, image: &Path) -> Result<Self, ToolError> {
        runner.run(
            Path::new(MOUNT_TOOL),
            &os_args([
                OsString::from("attach"),
                OsString::from("-mountpoint"),
                mount_point.as_os_str().to_os_string(),
                image.as_os_str().to_os_string(),
            ]),
        )?;
        Ok(MountGuard {
            runner,
            mount_point,
            attached: true,
        })
    }

    fn detach(mut self) -> Result<(), ToolError> {
        self.attached = false;
        self.run_detach()
    }

    fn run_detach(&self) -> Result<(), ToolError> {
        self.runner.run(
            Path::new(MOUNT_TOOL),
            &os_args([
                OsString::from("detach"),
                self.mount_point.as_os_str().to_os_string(),
            ]),
        )
    }
}

impl<R: ToolRunner> Drop for MountGuard<'_, R> {
    fn drop(&mut self) {
        if self.attached {
            if let Err(e) = self.run_detach() {
                warn!("failed to detach {}: {}", self.mount_point.display(), e);
            }
        }
    }
}

/// Walk a mounted image for `*.tar.gz` files and unpack only dynamic-library
/// and bitcode entries into `dest`.
fn unpack_nested_tarballs(mount: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(mount).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", mount.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().ends_with(".tar.gz") {
            continue;
        }
        info!("extracting libraries from {}", entry.path().display());
        let file = fs::File::open(entry.path())
            .with_context(|| format!("failed to open {}", entry.path().display()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let entries = archive
            .entries()
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        for tar_entry in entries {
            let mut tar_entry = tar_entry
                .with_context(|| format!("corrupt archive {}", entry.path().display()))?;
            let entry_path = tar_entry.path()?.into_owned();
            if !matches_extension(&entry_path, &["dylib", "bc"]) {
                continue;
            }
            tar_entry.unpack_in(dest).with_context(|| {
                format!(
                    "failed to unpack {} from {}",
                    entry_path.display(),
                    entry.path().display()
                )
            })?;
        }
    }
    Ok(())
}
