//! Domain error taxonomies surfaced to the caller with full payloads.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Failures while resolving logical library names to on-disk files.
///
/// All of these indicate a broken version/platform configuration or an
/// unexpected vendor layout change; none are retryable.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A declared library name matched nothing under its naming template.
    #[error("cannot find library `{name}`: nothing matches `{pattern}` in {}", dir.display())]
    ArtifactNotFound {
        name: String,
        pattern: String,
        dir: PathBuf,
    },

    /// A platform without versioned-symlink conventions saw more than one
    /// match for a single library name.
    #[error("aliasing present for library `{name}` (pattern `{pattern}`), found: {}", matches.join(", "))]
    AmbiguousArtifact {
        name: String,
        pattern: String,
        matches: Vec<String>,
    },

    /// Every match for a symlink-resolved library is itself a symlink; the
    /// alias chain has no real file to point at.
    #[error("library `{name}` (pattern `{pattern}`) has no regular file, only symlinks")]
    NoConcreteFile { name: String, pattern: String },

    /// A matched directory entry is neither a regular file nor a symlink.
    #[error("matched entry {} is neither a regular file nor a symlink", path.display())]
    UnexpectedEntry { path: PathBuf },

    /// A rendered template is not a valid filename glob.
    #[error("invalid naming pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("cannot list directory {}", dir.display())]
    ListDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot stat {}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures invoking an external tool (unarchiver, installer executable,
/// disk-image utility). Always fatal for the current extraction.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{program}` exited with {status}")]
    Failed { program: String, status: ExitStatus },

    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
