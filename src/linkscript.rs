//! Post-link / pre-unlink batch script generation for the umbrella toolkit
//! package on Windows.
//!
//! The toolkit package ships no files of its own; instead its post-link
//! script hard-links the DLLs of the runtime packages into `%PREFIX%\DLLs`
//! where the interpreter loads them from, and the pre-unlink script removes
//! them again.

use crate::extract::PlatformExtractor;
use crate::tools::ToolRunner;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

/// Runtime packages whose DLLs the toolkit package links in.
const TOOLKIT_RUNTIME_DEPS: &[&str] = &[
    "cudart", "cufft", "cublas", "cusparse", "curand", "cusolver", "npp", "nvrtc", "nvvm",
];

const POST_LINK_SCRIPT: &str = ".cudatoolkit-post-link.bat";
const PRE_UNLINK_SCRIPT: &str = ".cudatoolkit-pre-unlink.bat";

/// Emit the toolkit link scripts under `<prefix>/Scripts`.
#[tracing::instrument(skip(extractor, prefix))]
pub fn create_toolkit_link_scripts<R: ToolRunner>(
    extractor: &PlatformExtractor<R>,
    prefix: &Path,
) -> Result<()> {
    let mut basenames = Vec::new();
    for dep in TOOLKIT_RUNTIME_DEPS {
        for artifact in extractor.resolve_package(dep)? {
            let name = artifact
                .path
                .file_name()
                .with_context(|| format!("artifact {} has no file name", artifact.path.display()))?
                .to_string_lossy()
                .into_owned();
            basenames.push(name);
        }
    }
    let (post_link, pre_unlink) = render_link_lines(&basenames);
    write_scripts(prefix, &post_link, &pre_unlink)
}

/// One `mklink /H` and one `del` line per DLL basename.
pub fn render_link_lines(basenames: &[String]) -> (Vec<String>, Vec<String>) {
    let post_link = basenames
        .iter()
        .map(|name| {
            format!(
                "mklink /H %PREFIX%\\DLLs\\{0} %PREFIX%\\Library\\bin\\{0} >> %PREFIX%\\.messages.txt",
                name
            )
        })
        .collect();
    let pre_unlink = basenames
        .iter()
        .map(|name| format!("del %PREFIX%\\DLLs\\{0} >> %PREFIX%\\.messages.txt", name))
        .collect();
    (post_link, pre_unlink)
}

fn write_scripts(prefix: &Path, post_link: &[String], pre_unlink: &[String]) -> Result<()> {
    let scripts_dir = prefix.join("Scripts");
    fs::create_dir_all(&scripts_dir)
        .with_context(|| format!("failed to create {}", scripts_dir.display()))?;

    let post_link_path = scripts_dir.join(POST_LINK_SCRIPT);
    info!("writing {}", post_link_path.display());
    fs::write(&post_link_path, lines_to_script(post_link))
        .with_context(|| format!("failed to write {}", post_link_path.display()))?;

    let pre_unlink_path = scripts_dir.join(PRE_UNLINK_SCRIPT);
    info!("writing {}", pre_unlink_path.display());
    fs::write(&pre_unlink_path, lines_to_script(pre_unlink))
        .with_context(|| format!("failed to write {}", pre_unlink_path.display()))?;
    Ok(())
}

fn lines_to_script(lines: &[String]) -> String {
    let mut script = lines.join("\n");
    if !script.is_empty() {
        script.push('\n');
    }
    script
}
