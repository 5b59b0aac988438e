//! Package pattern resolution.
//!
//! Command lists accept glob patterns (`cmds/core/*`) alongside literal
//! package directories. Patterns are expanded against the filesystem
//! before any builder runs, so a typo'd pattern fails the build up
//! front instead of silently producing an empty image.

use globset::{GlobBuilder, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no packages match pattern {pattern:?}")]
    NoMatch { pattern: String },

    #[error("invalid glob pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("package path {path:?} has no directory name")]
    NoName { path: PathBuf },
}

/// True if the pattern contains glob metacharacters.
fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Expand a list of package patterns into concrete package directories.
///
/// Literal paths pass through untouched; they are validated later when
/// the builder tries to compile them. Glob patterns are matched against
/// directories under the pattern's first non-glob prefix. A pattern
/// that matches nothing is an error. Duplicates are removed, order of
/// first appearance is kept.
pub fn resolve_packages<I, S>(patterns: I) -> Result<Vec<PathBuf>, ResolveError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        if !is_glob(pattern) {
            let path = PathBuf::from(pattern);
            if seen.insert(path.clone()) {
                out.push(path);
            }
            continue;
        }

        // `*` must stop at path separators, or a package pattern would
        // also match every subdirectory of each package.
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| ResolveError::BadPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        let mut builder = GlobSetBuilder::new();
        builder.add(glob);
        let set = builder.build().map_err(|source| ResolveError::BadPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let root = glob_root(pattern);
        let mut matched = false;
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            if set.is_match(entry.path()) {
                matched = true;
                let path = entry.path().to_path_buf();
                if seen.insert(path.clone()) {
                    out.push(path);
                }
            }
        }

        if !matched {
            return Err(ResolveError::NoMatch {
                pattern: pattern.to_string(),
            });
        }
    }

    Ok(out)
}

/// The directory to walk for a glob pattern: everything before the
/// first component containing a metacharacter.
fn glob_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    for component in Path::new(pattern).components() {
        match component {
            Component::Normal(part) if is_glob(&part.to_string_lossy()) => break,
            other => root.push(other),
        }
    }
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root
    }
}

/// The command name for a package directory is its basename.
pub fn command_name(package: &Path) -> Result<String, ResolveError> {
    package
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ResolveError::NoName {
            path: package.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_packages(root: &Path, names: &[&str]) {
        for name in names {
            // Real packages carry a src/ subdirectory.
            fs::create_dir_all(root.join("cmds/core").join(name).join("src")).unwrap();
        }
    }

    #[test]
    fn test_literal_passes_through() {
        let resolved = resolve_packages(["some/missing/pkg"]).unwrap();
        assert_eq!(resolved, vec![PathBuf::from("some/missing/pkg")]);
    }

    #[test]
    fn test_glob_expands_to_directories() {
        let tmp = tempfile::tempdir().unwrap();
        make_packages(tmp.path(), &["init", "ls", "cat"]);
        // A file alongside the packages must not match.
        fs::write(tmp.path().join("cmds/core/README"), "x").unwrap();

        let pattern = format!("{}/cmds/core/*", tmp.path().display());
        let resolved = resolve_packages([pattern]).unwrap();
        let names: Vec<String> = resolved
            .iter()
            .map(|p| command_name(p).unwrap())
            .collect();
        assert_eq!(resolved.len(), 3);
        assert!(names.contains(&"init".to_string()));
        assert!(names.contains(&"ls".to_string()));
        assert!(names.contains(&"cat".to_string()));
        assert!(!names.contains(&"README".to_string()));
    }

    #[test]
    fn test_glob_stays_at_its_own_depth() {
        let tmp = tempfile::tempdir().unwrap();
        make_packages(tmp.path(), &["init", "ls"]);

        let pattern = format!("{}/cmds/core/*", tmp.path().display());
        let resolved = resolve_packages([pattern]).unwrap();
        // Package subdirectories like cmds/core/init/src must not show
        // up as packages of their own.
        assert_eq!(resolved.len(), 2);
        for p in &resolved {
            assert_ne!(command_name(p).unwrap(), "src");
        }
    }

    #[test]
    fn test_glob_with_no_match_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let pattern = format!("{}/nothing/*", tmp.path().display());
        let err = resolve_packages([pattern.clone()]).unwrap_err();
        assert!(matches!(err, ResolveError::NoMatch { .. }));
    }

    #[test]
    fn test_duplicates_removed() {
        let resolved = resolve_packages(["pkg/a", "pkg/b", "pkg/a"]).unwrap();
        assert_eq!(
            resolved,
            vec![PathBuf::from("pkg/a"), PathBuf::from("pkg/b")]
        );
    }

    #[test]
    fn test_command_name_is_basename() {
        assert_eq!(
            command_name(Path::new("cmds/core/ls")).unwrap(),
            "ls".to_string()
        );
    }

    #[test]
    fn test_glob_root() {
        assert_eq!(glob_root("cmds/core/*"), PathBuf::from("cmds/core"));
        assert_eq!(glob_root("*"), PathBuf::from("."));
        assert_eq!(glob_root("/abs/p*/q"), PathBuf::from("/abs"));
    }
}
