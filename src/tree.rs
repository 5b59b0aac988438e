//! In-memory staging tree mapping archive paths to pending sources.
//!
//! Two flat maps keyed by slash-joined archive path: one to filesystem
//! source paths, one to already-built records. A path lives in at most
//! one of the two. The flat representation keeps conflict detection and
//! best-effort insertion O(1), which the base-archive merge relies on.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::cpio::{make_reproducible, Record, RecordWriter};

#[derive(Debug, Error)]
pub enum TreeError {
    /// The destination is already claimed by a different source.
    #[error("{path}: already exists in archive")]
    AlreadyExists { path: String },

    /// Archive entries must be named by non-empty relative paths that
    /// stay inside the archive.
    #[error("{path:?}: archive paths must be non-empty, relative, and free of '..'")]
    InvalidPath { path: String },

    #[error("walking {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Strip leading separators and empty/`.` components from an archive
/// destination path. A leading `/` is an addressing convenience, not an
/// error.
fn normalize(dest: &str) -> String {
    dest.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// A `..` component would let an entry reparent itself, or escape the
/// root entirely when the archive is written out as a directory.
fn has_parent_refs(path: &str) -> bool {
    path.split('/').any(|c| c == "..")
}

fn join_rel(dest: &str, rel: &str) -> String {
    if dest.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        dest.to_string()
    } else {
        format!("{dest}/{rel}")
    }
}

/// The virtual file tree: archive paths claimed by filesystem sources or
/// synthesized records, consumed exactly once by the reconciler.
#[derive(Debug, Default)]
pub struct FileTree {
    files: BTreeMap<String, PathBuf>,
    records: BTreeMap<String, Record>,
}

impl FileTree {
    pub fn new() -> FileTree {
        FileTree::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name) || self.records.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.records.is_empty()
    }

    /// The filesystem source claimed for `name`, if any.
    pub fn source(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    pub fn record(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    fn insert_file(&mut self, dest: String, src: PathBuf) -> Result<(), TreeError> {
        if self.records.contains_key(&dest) {
            return Err(TreeError::AlreadyExists { path: dest });
        }
        match self.files.get(&dest) {
            Some(existing) if *existing == src => Ok(()), // idempotent
            Some(_) => Err(TreeError::AlreadyExists { path: dest }),
            None => {
                self.files.insert(dest, src);
                Ok(())
            }
        }
    }

    fn add_path(&mut self, src: &Path, dest: &str, follow: bool) -> Result<(), TreeError> {
        let meta = if follow {
            std::fs::metadata(src)?
        } else {
            std::fs::symlink_metadata(src)?
        };
        if !meta.is_dir() {
            if dest.is_empty() {
                return Err(TreeError::InvalidPath { path: String::new() });
            }
            return self.insert_file(dest.to_string(), src.to_path_buf());
        }
        for entry in WalkDir::new(src).follow_links(follow) {
            let entry = entry.map_err(|e| TreeError::Walk {
                path: src.display().to_string(),
                source: e,
            })?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .expect("walkdir yields paths under its root")
                .to_string_lossy()
                .into_owned();
            let name = join_rel(dest, &rel);
            if name.is_empty() {
                continue;
            }
            self.insert_file(name, entry.path().to_path_buf())?;
        }
        Ok(())
    }

    /// Add `src` to the archive at `dest`, following symlinks.
    /// Directories are added recursively. Adding the identical source at
    /// an already-claimed destination succeeds; a different source is a
    /// conflict.
    pub fn add_file(&mut self, src: &Path, dest: &str) -> Result<(), TreeError> {
        // Resolve the source fully so two spellings of the same file
        // compare equal under the idempotence rule.
        let src = std::fs::canonicalize(src)?;
        let dest = normalize(dest);
        if has_parent_refs(&dest) {
            return Err(TreeError::InvalidPath { path: dest });
        }
        self.add_path(&src, &dest, true)
    }

    /// Like [`FileTree::add_file`], but symlinks are archived as
    /// symlinks rather than dereferenced.
    pub fn add_file_no_follow(&mut self, src: &Path, dest: &str) -> Result<(), TreeError> {
        let dest = normalize(dest);
        if has_parent_refs(&dest) {
            return Err(TreeError::InvalidPath { path: dest });
        }
        self.add_path(src, &dest, false)
    }

    /// Insert a synthesized record at its own path. Conflicts compare by
    /// deep equality of the record.
    pub fn add_record(&mut self, r: Record) -> Result<(), TreeError> {
        if r.name.starts_with('/') || r.name.is_empty() || has_parent_refs(&r.name) {
            return Err(TreeError::InvalidPath { path: r.name });
        }
        if self.files.contains_key(&r.name) {
            return Err(TreeError::AlreadyExists { path: r.name });
        }
        match self.records.get(&r.name) {
            Some(existing) if *existing == r => Ok(()),
            Some(_) => Err(TreeError::AlreadyExists { path: r.name }),
            None => {
                self.records.insert(r.name.clone(), r);
                Ok(())
            }
        }
    }

    /// Best-effort insert for base-archive merging: an existing claim
    /// wins silently.
    pub fn add_record_if_absent(&mut self, r: Record) {
        let _ = self.add_record(r);
    }

    /// Move the entry at `old` to `new`, if present.
    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(src) = self.files.remove(old) {
            self.files.insert(new.to_string(), src);
        } else if let Some(mut r) = self.records.remove(old) {
            r.name = new.to_string();
            self.records.insert(new.to_string(), r);
        }
    }

    /// Insert a default 0755 directory record for every missing ancestor
    /// of every claimed path. Explicitly claimed ancestors are left
    /// untouched, whatever their mode.
    pub fn fill_in_parents(&mut self) {
        let paths: Vec<String> = self
            .files
            .keys()
            .chain(self.records.keys())
            .cloned()
            .collect();
        for p in paths {
            let mut path = p.as_str();
            while let Some((parent, _)) = path.rsplit_once('/') {
                if !self.contains(parent) {
                    self.records
                        .insert(parent.to_string(), Record::directory(parent, 0o755));
                }
                path = parent;
            }
        }
    }

    /// Write every entry to the sink in sorted path order, normalized
    /// for reproducibility.
    pub fn write_to(&self, w: &mut dyn RecordWriter) -> Result<(), TreeError> {
        let mut names: Vec<&String> = self.files.keys().chain(self.records.keys()).collect();
        names.sort();
        for name in names {
            let record = match self.records.get(name) {
                Some(r) => r.clone(),
                None => Record::from_path(&self.files[name], name.clone())?,
            };
            w.write_record(make_reproducible(record))?;
        }
        Ok(())
    }
}
