//! The build pipeline: registry lookup, blob fetch and verification,
//! platform extraction, and materialization of one package.

use crate::extract::PlatformExtractor;
use crate::fetch;
use crate::linkscript;
use crate::platform::Platform;
use crate::registry::{Registry, TOOLKIT_PACKAGE};
use crate::tools::{SystemToolRunner, ToolRunner};
use anyhow::{Context, Result};
use log::info;
use reqwest::Client;
use std::fs;
use std::path::PathBuf;

const STAGING_DIR_NAME: &str = "blob_files";

#[derive(Debug)]
pub struct BuildOptions {
    /// Product version to build, e.g. "8.0".
    pub version: String,
    /// Package to materialize.
    pub package: String,
    /// Install prefix receiving the library directory.
    pub prefix: PathBuf,
    /// Where blobs are downloaded to (and read from).
    pub src_dir: PathBuf,
    /// Staging root for extraction; defaults to `<src_dir>/blob_files`.
    pub staging_dir: Option<PathBuf>,
    /// Platform override; defaults to the detected one.
    pub platform: Option<Platform>,
}

/// Run a build with the system tool runner and a fresh HTTP client.
pub async fn run(registry: &Registry, options: BuildOptions) -> Result<()> {
    let client = Client::builder()
        .user_agent(concat!("cudapack/", env!("CUDAPACK_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    run_with(registry, options, client, SystemToolRunner).await
}

#[tracing::instrument(skip(registry, options, client, runner))]
pub async fn run_with<R: ToolRunner>(
    registry: &Registry,
    options: BuildOptions,
    client: Client,
    runner: R,
) -> Result<()> {
    let platform = match options.platform {
        Some(platform) => platform,
        None => Platform::detect()?,
    };
    info!(
        "building package {} for CUDA {} on {}",
        options.package, options.version, platform
    );

    let version = registry.version(&options.version)?;
    let platform_spec = version.platform(platform)?;
    if options.package != TOOLKIT_PACKAGE {
        // fail on an unknown package before any network or unpack work
        version.package(&options.package)?;
    }

    fetch::download_blobs(&client, version, platform_spec, &options.src_dir).await?;
    fetch::verify_blob(&client, version, platform_spec, &options.src_dir).await?;

    let staging = options
        .staging_dir
        .unwrap_or_else(|| options.src_dir.join(STAGING_DIR_NAME));
    fs::create_dir_all(&staging)
        .with_context(|| format!("failed to create staging directory {}", staging.display()))?;

    let mut extractor =
        PlatformExtractor::new(platform, version, options.src_dir.clone(), staging, runner)?;
    extractor.extract()?;

    let output_dir = options.prefix.join(platform.lib_subdir());
    extractor.materialize(&options.package, &output_dir)?;

    if platform == Platform::Windows && options.package == TOOLKIT_PACKAGE {
        linkscript::create_toolkit_link_scripts(&extractor, &options.prefix)?;
    }

    info!(
        "package {} materialized into {}",
        options.package,
        output_dir.display()
    );
    Ok(())
}
