//! Filename templates mapping logical library names to on-disk patterns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A filename pattern with a single `{}` substitution slot.
///
/// Rendering with a logical library name produces a glob over directory
/// entries, e.g. `lib{}.so*` renders to `libcudart.so*` and matches the
/// whole symlink alias chain of that library, while `{}64_80.dll` renders
/// to an exact filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryTemplate(String);

impl LibraryTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        LibraryTemplate(pattern.into())
    }

    /// Substitute `name` into the slot, yielding a filename glob.
    pub fn render(&self, name: &str) -> String {
        self.0.replacen("{}", name, 1)
    }

    pub fn slot_count(&self) -> usize {
        self.0.matches("{}").count()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LibraryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LibraryTemplate {
    fn from(pattern: &str) -> Self {
        LibraryTemplate::new(pattern)
    }
}
