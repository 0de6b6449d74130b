//! Replication of resolved artifacts into the output tree.
//!
//! The copy must preserve the symlink-vs-regular-file distinction exactly:
//! a symlink is recreated under its original name with the identical target
//! string (never resolved), so the dynamic linker's search-by-soname keeps
//! working unchanged from the vendor's own layout.

use crate::resolve::ResolvedArtifact;
use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Copy/replicate `artifacts` into `output_dir`, creating it if needed.
///
/// Idempotent: re-running against an already-populated output directory
/// replaces symlinks and overwrites file contents with identical results.
#[tracing::instrument(skip(artifacts, output_dir))]
pub fn materialize(artifacts: &[ResolvedArtifact], output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    for artifact in artifacts {
        let file_name = artifact
            .path
            .file_name()
            .with_context(|| format!("artifact path {} has no file name", artifact.path.display()))?;
        let dest = output_dir.join(file_name);

        if artifact.is_symlink {
            let target = fs::read_link(&artifact.path)
                .with_context(|| format!("failed to read symlink {}", artifact.path.display()))?;
            info!("linking {} to {}", target.display(), dest.display());
            replace_symlink(&target, &dest)
                .with_context(|| format!("failed to create symlink {}", dest.display()))?;
        } else {
            info!("copying {} to {}", artifact.path.display(), output_dir.display());
            match fs::copy(&artifact.path, &dest) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    // Some vendor installers ship read-only files which also
                    // land read-only in the output tree and block a re-copy.
                    warn!(
                        "permission denied copying {} to {}: {}; clear the read-only \
                         attribute on the destination (chmod u+w / attrib -R) and re-run",
                        artifact.path.display(),
                        dest.display(),
                        e
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "failed to copy {} to {}",
                            artifact.path.display(),
                            dest.display()
                        )
                    });
                }
            }
        }
    }
    Ok(())
}

/// Create `link` pointing at `target`, replacing whatever is at `link`.
fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link)
            .with_context(|| format!("failed to remove existing {}", link.display()))?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)?;
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)?;
    }
    Ok(())
}
