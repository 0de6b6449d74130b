//! Downloading vendor blobs and verifying them against the published
//! checksum table.
//!
//! Downloads are skipped when the file is already on disk; there is no
//! retry logic, a failed transfer aborts the build.

use crate::registry::{PlatformSpec, VersionSpec};
use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use log::info;
use md5::{Digest, Md5};
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Download the base installer blob and every patch blob into `src_dir`.
#[tracing::instrument(skip(client, version, platform_spec, src_dir))]
pub async fn download_blobs(
    client: &Client,
    version: &VersionSpec,
    platform_spec: &PlatformSpec,
    src_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(src_dir)
        .with_context(|| format!("failed to create source directory {}", src_dir.display()))?;

    let base = Url::parse(&version.base_url)
        .with_context(|| format!("invalid base url `{}`", version.base_url))?;

    let installers = base
        .join(&version.installers_url_ext)
        .with_context(|| format!("invalid installers path `{}`", version.installers_url_ext))?;
    let blob_url = installers
        .join(&platform_spec.blob)
        .with_context(|| format!("invalid blob name `{}`", platform_spec.blob))?;
    download_if_absent(client, blob_url, &src_dir.join(&platform_spec.blob)).await?;

    let patch_base = base
        .join(&version.patch_url_ext)
        .with_context(|| format!("invalid patch path `{}`", version.patch_url_ext))?;
    for patch in &platform_spec.patches {
        let patch_url = patch_base
            .join(patch)
            .with_context(|| format!("invalid patch name `{}`", patch))?;
        download_if_absent(client, patch_url, &src_dir.join(patch)).await?;
    }
    Ok(())
}

/// Check the base blob's MD5 against the vendor's published table.
#[tracing::instrument(skip(client, version, platform_spec, src_dir))]
pub async fn verify_blob(
    client: &Client,
    version: &VersionSpec,
    platform_spec: &PlatformSpec,
    src_dir: &Path,
) -> Result<()> {
    let table = fetch_checksum_table(client, &version.md5_url).await?;
    let blob_path = src_dir.join(&platform_spec.blob);
    let digest = md5_file(&blob_path)?;

    let Some(listed) = table.get(&digest) else {
        bail!(
            "checksum mismatch for {}: digest {} is not in the vendor table",
            blob_path.display(),
            digest
        );
    };
    // The table names blobs with different suffix punctuation than the
    // download links ("linux.run" vs "linux-run"); compare ignoring the tail.
    let prefix = &platform_spec.blob[..platform_spec.blob.len().saturating_sub(7)];
    if !listed.starts_with(prefix) {
        bail!(
            "checksum entry for digest {} names `{}`, expected a file starting with `{}`",
            digest,
            listed,
            prefix
        );
    }
    info!("verified {} (md5 {})", blob_path.display(), digest);
    Ok(())
}

async fn download_if_absent(client: &Client, url: Url, dest: &Path) -> Result<()> {
    if dest.is_file() {
        info!("Using existing downloaded file: {}", dest.display());
        return Ok(());
    }
    info!("downloading {} to {}", url, dest.display());

    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("failed to fetch {}", url))?
        .error_for_status()
        .with_context(|| format!("failed to fetch {}", url))?;

    let mut file = fs::File::create(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("download of {} interrupted", url))?;
        file.write_all(&chunk)
            .with_context(|| format!("failed to write {}", dest.display()))?;
    }
    Ok(())
}

async fn fetch_checksum_table(client: &Client, url: &str) -> Result<HashMap<String, String>> {
    info!("fetching checksum table from {}", url);
    let text = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch checksum table {}", url))?
        .error_for_status()
        .with_context(|| format!("failed to fetch checksum table {}", url))?
        .text()
        .await
        .with_context(|| format!("failed to read checksum table {}", url))?;
    Ok(parse_checksum_table(&text))
}

/// `<digest> <filename>` per line, keyed by digest the way lookups happen.
fn parse_checksum_table(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(digest), Some(name)) => {
                    Some((digest.to_lowercase(), name.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

fn md5_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}
