//! Resolution of logical library names to on-disk files.
//!
//! Installers ship each shared library as a small family of files: on
//! platforms with versioned-symlink conventions, one real file plus a chain
//! of symlinks of decreasing version specificity (`libfoo.so` ->
//! `libfoo.so.7` -> `libfoo.so.7.5.18`); elsewhere, a single exactly-named
//! binary. Naive copying either duplicates binaries or breaks the alias
//! chain the dynamic linker resolves sonames through. This module picks
//! exactly the files that constitute "the" library for a platform.

use crate::error::ResolveError;
use crate::registry::LibraryTemplate;
use glob::Pattern;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// One file surviving resolution.
///
/// If `is_symlink` is set, materialization must recreate the link with the
/// identical target string; otherwise the file's bytes are copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub is_symlink: bool,
}

/// Resolve each logical library name in `names` against the files in `dir`.
///
/// The result preserves the order of `names`; within one name, entries keep
/// the (sorted) directory-listing order. With `symlink_aware` set, duplicate
/// concrete binaries for a name are collapsed to the lexicographically
/// greatest filename and every matching symlink is kept verbatim; without
/// it, exactly one match is required per name.
///
/// Lexicographic "greatest" stands in for "highest version" here. That holds
/// for the dotted numeric suffixes the vendor actually ships (same width per
/// release) and is not a semantic version compare.
#[tracing::instrument(skip(names, dir, template))]
pub fn resolve_libraries(
    names: &[String],
    dir: &Path,
    template: &LibraryTemplate,
    symlink_aware: bool,
) -> Result<Vec<ResolvedArtifact>, ResolveError> {
    let entries = list_sorted(dir)?;

    let mut resolved = Vec::new();
    for name in names {
        let rendered = template.render(name);
        let pattern =
            Pattern::new(&rendered).map_err(|source| ResolveError::InvalidPattern {
                pattern: rendered.clone(),
                source,
            })?;

        let matches: Vec<&str> = entries
            .iter()
            .map(String::as_str)
            .filter(|file_name| pattern.matches(file_name))
            .collect();
        debug!("{} -> {} match(es) for `{}`", name, matches.len(), rendered);

        if matches.is_empty() {
            return Err(ResolveError::ArtifactNotFound {
                name: name.clone(),
                pattern: rendered,
                dir: dir.to_path_buf(),
            });
        }
        if !symlink_aware && matches.len() != 1 {
            return Err(ResolveError::AmbiguousArtifact {
                name: name.clone(),
                pattern: rendered,
                matches: matches.iter().map(|m| m.to_string()).collect(),
            });
        }

        let mut family = Vec::with_capacity(matches.len());
        for file_name in &matches {
            let path = dir.join(file_name);
            let meta = fs::symlink_metadata(&path).map_err(|source| ResolveError::Stat {
                path: path.clone(),
                source,
            })?;
            let is_symlink = meta.file_type().is_symlink();
            if !is_symlink && !meta.is_file() {
                return Err(ResolveError::UnexpectedEntry { path });
            }
            family.push(ResolvedArtifact { path, is_symlink });
        }

        if symlink_aware {
            // One real file wins; the rest are stale duplicates the installer
            // happened to ship. Symlinks are kept regardless of target, the
            // alias chain must survive under its original names.
            let canonical = family
                .iter()
                .filter(|a| !a.is_symlink)
                .max_by(|a, b| a.path.file_name().cmp(&b.path.file_name()))
                .map(|a| a.path.clone())
                .ok_or_else(|| ResolveError::NoConcreteFile {
                    name: name.clone(),
                    pattern: rendered.clone(),
                })?;
            family.retain(|a| a.is_symlink || a.path == canonical);
        }

        resolved.extend(family);
    }
    Ok(resolved)
}

/// Directory listing in sorted filename order, so resolution is
/// deterministic regardless of filesystem iteration order.
fn list_sorted(dir: &Path) -> Result<Vec<String>, ResolveError> {
    let read = fs::read_dir(dir).map_err(|source| ResolveError::ListDir {
        dir: dir.to_path_buf(),
        source,
    })?;
    let mut names = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| ResolveError::ListDir {
            dir: dir.to_path_buf(),
            source,
        })?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[cfg(unix)]
    fn link(dir: &Path, target: &str, name: &str) {
        std::os::unix::fs::symlink(target, dir.join(name)).unwrap();
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_chain_resolves_whole_family() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "libfoo.so.7.5.18", "real");
        link(dir.path(), "libfoo.so.7.5.18", "libfoo.so.7");
        link(dir.path(), "libfoo.so.7", "libfoo.so");

        let resolved = resolve_libraries(
            &names(&["foo"]),
            dir.path(),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap();

        assert_eq!(resolved.len(), 3);
        let concrete: Vec<_> = resolved.iter().filter(|a| !a.is_symlink).collect();
        assert_eq!(concrete.len(), 1);
        assert!(concrete[0].path.ends_with("libfoo.so.7.5.18"));
        assert_eq!(resolved.iter().filter(|a| a.is_symlink).count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_duplicate_concrete_files_collapse_to_greatest() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "libfoo.so.7.5.17", "stale");
        write_file(dir.path(), "libfoo.so.7.5.18", "current");
        link(dir.path(), "libfoo.so.7.5.18", "libfoo.so");

        let resolved = resolve_libraries(
            &names(&["foo"]),
            dir.path(),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap();

        let concrete: Vec<_> = resolved.iter().filter(|a| !a.is_symlink).collect();
        assert_eq!(concrete.len(), 1);
        assert!(concrete[0].path.ends_with("libfoo.so.7.5.18"));
        // the stale duplicate is gone, the symlink survives
        assert_eq!(resolved.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_kept_regardless_of_target() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "libfoo.so.8.0.61", "real");
        // dangling alias, target re-pointed by the installer later
        link(dir.path(), "libfoo.so.9.9.99", "libfoo.so");

        let resolved = resolve_libraries(
            &names(&["foo"]),
            dir.path(),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().any(|a| a.is_symlink));
    }

    #[cfg(unix)]
    #[test]
    fn test_all_symlinks_is_an_error() {
        let dir = tempdir().unwrap();
        link(dir.path(), "libfoo.so.7.5.18", "libfoo.so");
        link(dir.path(), "libfoo.so.7.5.18", "libfoo.so.7");

        let err = resolve_libraries(
            &names(&["foo"]),
            dir.path(),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::NoConcreteFile { .. }));
    }

    #[test]
    fn test_exact_match_single_dll() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "cudart64_75.dll");

        let resolved = resolve_libraries(
            &names(&["cudart"]),
            dir.path(),
            &LibraryTemplate::new("{}64_75.dll"),
            false,
        )
        .unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].path.ends_with("cudart64_75.dll"));
        assert!(!resolved[0].is_symlink);
    }

    #[test]
    fn test_missing_library_is_fatal_with_pattern() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "libfoo.so");

        let err = resolve_libraries(
            &names(&["bar"]),
            dir.path(),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap_err();
        match err {
            ResolveError::ArtifactNotFound { name, pattern, .. } => {
                assert_eq!(name, "bar");
                assert_eq!(pattern, "libbar.so*");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ambiguous_match_without_symlink_convention() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "cudart64_75.dll");
        touch(dir.path(), "cudart64_80.dll");

        let err = resolve_libraries(
            &names(&["cudart"]),
            dir.path(),
            &LibraryTemplate::new("{}64_*.dll"),
            false,
        )
        .unwrap_err();
        match err {
            ResolveError::AmbiguousArtifact { name, matches, .. } => {
                assert_eq!(name, "cudart");
                assert_eq!(matches, vec!["cudart64_75.dll", "cudart64_80.dll"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bitcode_family_preserves_input_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "libdevice.compute_30.10.bc");
        touch(dir.path(), "libdevice.compute_20.10.bc");

        let resolved = resolve_libraries(
            &names(&["20.10", "30.10"]),
            dir.path(),
            &LibraryTemplate::new("libdevice.compute_{}.bc"),
            false,
        )
        .unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].path.ends_with("libdevice.compute_20.10.bc"));
        assert!(resolved[1].path.ends_with("libdevice.compute_30.10.bc"));
    }

    #[test]
    fn test_multiple_names_concatenate_in_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "nppc64_80.dll");
        touch(dir.path(), "nppi64_80.dll");
        touch(dir.path(), "npps64_80.dll");

        let resolved = resolve_libraries(
            &names(&["nppc", "nppi", "npps"]),
            dir.path(),
            &LibraryTemplate::new("{}64_80.dll"),
            false,
        )
        .unwrap();
        let file_names: Vec<_> = resolved
            .iter()
            .map(|a| a.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(file_names, vec!["nppc64_80.dll", "nppi64_80.dll", "npps64_80.dll"]);
    }

    #[test]
    fn test_matched_directory_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("libfoo.so.7.5")).unwrap();
        write_file(dir.path(), "libfoo.so.7.5.18", "real");

        let err = resolve_libraries(
            &names(&["foo"]),
            dir.path(),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::UnexpectedEntry { .. }));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let err = resolve_libraries(
            &names(&["foo"]),
            Path::new("/nonexistent/store"),
            &LibraryTemplate::new("lib{}.so*"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::ListDir { .. }));
    }
}
