//! Extraction via the self-installing `.run` blob (Linux).
//!
//! The blob is itself the installer: marked executable and invoked in
//! silent toolkit-only mode against the staging root. The installer's own
//! layout becomes the store, no separate collection pass.

use super::{ExtractContext, StoreDirs, set_executable};
use crate::tools::{ToolRunner, os_args};
use anyhow::Result;
use std::ffi::OsString;

pub struct RunfileExtractor<R: ToolRunner> {
    ctx: ExtractContext<R>,
}

impl<R: ToolRunner> RunfileExtractor<R> {
    pub(crate) fn new(ctx: ExtractContext<R>) -> Self {
        RunfileExtractor { ctx }
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
        let staging = &ctx.staging_root;

        let blob = ctx.src_dir.join(&spec.blob);
        set_executable(&blob)?;
        ctx.runner.run(
            &blob,
            &os_args([
                OsString::from("--toolkitpath"),
                staging.clone().into_os_string(),
                OsString::from("--toolkit"),
                OsString::from("--silent"),
            ]),
        )?;

        for patch in &spec.patches {
            let patch_blob = ctx.src_dir.join(patch);
            set_executable(&patch_blob)?;
            ctx.runner.run(
                &patch_blob,
                &os_args([
                    OsString::from("--installdir"),
                    staging.clone().into_os_string(),
                    OsString::from("--accept-eula"),
                    OsString::from("--silent"),
                ]),
            )?;
        }

        Ok(StoreDirs {
            libraries: staging.join("lib64"),
            nvvm: staging.join("nvvm").join("lib64"),
            libdevice: staging.join("nvvm").join("libdevice"),
        })
    }
}
