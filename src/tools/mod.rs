//! External tool invocation.
//!
//! The vendor container formats are owned by external programs (an
//! unarchiver, the self-installing blob itself, the disk-image utility).
//! Invocations are synchronous and blocking with no timeout; a non-zero
//! exit is fatal for the extraction that requested it.

use crate::error::ToolError;
use log::debug;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

#[cfg_attr(test, mockall::automock)]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, inheriting stdio, and wait for it to exit.
    fn run(&self, program: &Path, args: &[OsString]) -> Result<(), ToolError>;
}

/// Runs tools as child processes of this one.
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    #[tracing::instrument(skip(self, args))]
    fn run(&self, program: &Path, args: &[OsString]) -> Result<(), ToolError> {
        debug!("running {} {:?}", program.display(), args);
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| ToolError::Spawn {
                program: program.display().to_string(),
                source,
            })?;
        if !status.success() {
            return Err(ToolError::Failed {
                program: program.display().to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Convenience for building argument vectors from mixed strings and paths.
pub fn os_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    args.into_iter().map(Into::into).collect()
}
