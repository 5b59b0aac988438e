//! Archive sinks, base-archive readers, and the reconciler.
//!
//! A sink is opened from a path plus a format (cpio container file or
//! directory tree) and finalized exactly once. The reconciler merges the
//! staged [`FileTree`] with an optional base-archive record stream and
//! drives the write; precedence is strict: user/builder tree entries
//! always win over base-archive entries of the same path.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::cpio::{
    self, make_reproducible, newc, Record, RecordKind, RecordReader, RecordWriter,
};
use crate::tree::{FileTree, TreeError};

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// A cpio (newc) container file.
    Cpio,
    /// Records written out as a directory tree.
    Dir,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Format, String> {
        match s {
            "cpio" => Ok(Format::Cpio),
            "dir" => Ok(Format::Dir),
            other => Err(format!(
                "unknown archive format {other:?}, must be one of: cpio, dir"
            )),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Format::Cpio => "cpio",
            Format::Dir => "dir",
        })
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("an output path is required")]
    NoPath,

    #[error("directory archives cannot be read as a base archive")]
    DirBaseUnsupported,

    #[error("opening {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// A record sink with a finalization step (cpio trailer, flush).
pub trait ArchiveWriter: RecordWriter {
    fn finish(&mut self) -> io::Result<()>;
}

/// Open a sink of the given format at `path`.
pub fn open_writer(format: Format, path: &Path) -> Result<Box<dyn ArchiveWriter>, ArchiveError> {
    if path.as_os_str().is_empty() {
        return Err(ArchiveError::NoPath);
    }
    match format {
        Format::Cpio => {
            let f = File::create(path).map_err(|source| ArchiveError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(CpioFileWriter {
                w: newc::Writer::new(BufWriter::new(f)),
            }))
        }
        Format::Dir => {
            std::fs::create_dir_all(path).map_err(|source| ArchiveError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(DirWriter {
                root: path.to_path_buf(),
            }))
        }
    }
}

/// Open a base archive of the given format as a record stream.
pub fn open_reader(format: Format, path: &Path) -> Result<Box<dyn RecordReader>, ArchiveError> {
    if path.as_os_str().is_empty() {
        return Err(ArchiveError::NoPath);
    }
    match format {
        Format::Cpio => {
            let f = File::open(path).map_err(|source| ArchiveError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(newc::Reader::new(BufReader::new(f))))
        }
        Format::Dir => Err(ArchiveError::DirBaseUnsupported),
    }
}

struct CpioFileWriter {
    w: newc::Writer<BufWriter<File>>,
}

impl RecordWriter for CpioFileWriter {
    fn write_record(&mut self, r: Record) -> io::Result<()> {
        self.w.write_record(r)
    }
}

impl ArchiveWriter for CpioFileWriter {
    fn finish(&mut self) -> io::Result<()> {
        self.w.write_trailer()
    }
}

/// Writes records as real files relative to a root directory.
struct DirWriter {
    root: PathBuf,
}

impl RecordWriter for DirWriter {
    fn write_record(&mut self, r: Record) -> io::Result<()> {
        let path = self.root.join(&r.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match r.kind() {
            RecordKind::Directory => {
                std::fs::create_dir_all(&path)?;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(r.perm()))?;
            }
            RecordKind::File => {
                std::fs::write(&path, r.data.read()?)?;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(r.perm()))?;
            }
            RecordKind::Symlink => {
                let target = r.symlink_target().unwrap_or_default();
                std::os::unix::fs::symlink(target, &path)?;
            }
            // Device nodes, fifos, and sockets need privileges we may not
            // have; the cpio format is the vehicle for those.
            other => {
                eprintln!("  [WARN] Skipping {} ({other:?}) in directory output", r.name);
            }
        }
        Ok(())
    }
}

impl ArchiveWriter for DirWriter {
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory, shareable sink. Lets callers keep a handle on the
/// archive after the reconciler has consumed the boxed writer.
#[derive(Clone, Default)]
pub struct SharedArchive(Arc<Mutex<cpio::Archive>>);

impl SharedArchive {
    pub fn new() -> SharedArchive {
        SharedArchive::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, cpio::Archive> {
        self.0.lock().expect("archive lock poisoned")
    }
}

impl RecordWriter for SharedArchive {
    fn write_record(&mut self, r: Record) -> io::Result<()> {
        self.lock().write_record(r)
    }
}

impl ArchiveWriter for SharedArchive {
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Inputs to the merge-and-write step.
pub struct WriteOpts {
    /// The staged tree; generally takes priority over the base archive.
    pub tree: FileTree,
    pub output: Box<dyn ArchiveWriter>,
    /// An existing archive to merge in at lowest precedence.
    pub base: Option<Box<dyn RecordReader>>,
    /// Keep the base archive's `init` rather than the tree's.
    pub use_existing_init: bool,
}

/// Merge the tree with the base archive and write the result.
///
/// When both the tree and the base archive define `init`, exactly one of
/// them ends up at `init` and the other at `inito`: the tree's wins
/// unless `use_existing_init` is set. Every other base record passes
/// through under its own name and is dropped silently if the tree
/// already claims the path.
pub fn write_archive(opts: WriteOpts) -> Result<(), ArchiveError> {
    let WriteOpts {
        mut tree,
        mut output,
        base,
        use_existing_init,
    } = opts;

    if let Some(mut base) = base {
        let rename_base_init = !use_existing_init && tree.contains("init");
        if use_existing_init && tree.contains("init") {
            // The base's init will win at "init"; park ours at "inito".
            tree.rename("init", "inito");
        }
        while let Some(r) = base.read_record()? {
            let mut r = make_reproducible(r);
            if rename_base_init && r.name == "init" {
                r.name = "inito".to_string();
            }
            tree.add_record_if_absent(r);
        }
    }

    tree.fill_in_parents();
    tree.write_to(&mut *output)?;
    output.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpio::Archive;

    fn base(records: Vec<Record>) -> Option<Box<dyn RecordReader>> {
        Some(Box::new(Archive::from_records(records).unwrap().into_reader()))
    }

    fn write(tree: FileTree, base_records: Option<Vec<Record>>, use_existing_init: bool) -> SharedArchive {
        let out = SharedArchive::new();
        write_archive(WriteOpts {
            tree,
            output: Box::new(out.clone()),
            base: base_records.map(|r| base(r).unwrap()),
            use_existing_init,
        })
        .unwrap();
        out
    }

    #[test]
    fn tree_entries_beat_base_entries() {
        let mut tree = FileTree::new();
        tree.add_record(Record::static_file("etc/hosts", "ours", 0o644)).unwrap();
        let out = write(
            tree,
            Some(vec![Record::static_file("etc/hosts", "base", 0o600)]),
            false,
        );
        let got = out.lock().get("etc/hosts").unwrap().data.read().unwrap();
        assert_eq!(got, b"ours");
    }

    #[test]
    fn base_init_renamed_when_tree_has_init() {
        let mut tree = FileTree::new();
        tree.add_record(Record::symlink("init", "bbin/init")).unwrap();
        let out = write(
            tree,
            Some(vec![Record::static_file("init", "base-init", 0o755)]),
            false,
        );
        let a = out.lock();
        assert_eq!(a.get("init").unwrap().symlink_target().as_deref(), Some("bbin/init"));
        assert_eq!(a.get("inito").unwrap().data.read().unwrap(), b"base-init");
    }

    #[test]
    fn existing_init_inverts_the_rename() {
        let mut tree = FileTree::new();
        tree.add_record(Record::symlink("init", "bbin/init")).unwrap();
        let out = write(
            tree,
            Some(vec![Record::static_file("init", "base-init", 0o755)]),
            true,
        );
        let a = out.lock();
        assert_eq!(a.get("init").unwrap().data.read().unwrap(), b"base-init");
        assert_eq!(a.get("inito").unwrap().symlink_target().as_deref(), Some("bbin/init"));
    }

    #[test]
    fn base_only_init_keeps_its_name() {
        let out = write(
            FileTree::new(),
            Some(vec![Record::static_file("init", "base-init", 0o755)]),
            false,
        );
        let a = out.lock();
        assert!(a.contains("init"));
        assert!(!a.contains("inito"));
    }

    #[test]
    fn base_records_cannot_climb_out_of_the_root() {
        let out = write(
            FileTree::new(),
            Some(vec![
                Record::static_file("../evil", "x", 0o644),
                Record::static_file("etc/motd", "hello", 0o644),
            ]),
            false,
        );
        let a = out.lock();
        assert!(!a.contains("../evil"));
        assert!(a.contains("etc/motd"));
    }

    #[test]
    fn base_directory_mode_is_retained() {
        let mut tree = FileTree::new();
        tree.add_record(Record::static_file("etc/hosts", "x", 0o644)).unwrap();
        let out = write(tree, Some(vec![Record::directory("etc", 0o700)]), false);
        // The base's explicit etc wins over a parent-filled default.
        assert_eq!(out.lock().get("etc").unwrap().perm(), 0o700);
    }

    #[test]
    fn no_base_writes_tree_with_parents() {
        let mut tree = FileTree::new();
        tree.add_record(Record::static_file("etc/hosts", "x", 0o644)).unwrap();
        let out = write(tree, None, false);
        let a = out.lock();
        assert_eq!(a.get("etc").unwrap().perm(), 0o755);
        assert!(a.contains("etc/hosts"));
    }

    #[test]
    fn cpio_writer_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.cpio");

        let mut tree = FileTree::new();
        tree.add_record(Record::static_file("etc/hosts", "hi", 0o644)).unwrap();
        let output = open_writer(Format::Cpio, &path).unwrap();
        write_archive(WriteOpts {
            tree,
            output,
            base: None,
            use_existing_init: false,
        })
        .unwrap();

        let mut rd = open_reader(Format::Cpio, &path).unwrap();
        let mut names = Vec::new();
        while let Some(r) = rd.read_record().unwrap() {
            names.push(r.name);
        }
        assert_eq!(names, ["etc", "etc/hosts"]);
    }

    #[test]
    fn dir_writer_materializes_records() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");

        let mut tree = FileTree::new();
        tree.add_record(Record::static_file("etc/hosts", "hi", 0o600)).unwrap();
        tree.add_record(Record::symlink("init", "bin/sh")).unwrap();
        let output = open_writer(Format::Dir, &root).unwrap();
        write_archive(WriteOpts {
            tree,
            output,
            base: None,
            use_existing_init: false,
        })
        .unwrap();

        assert_eq!(std::fs::read_to_string(root.join("etc/hosts")).unwrap(), "hi");
        assert_eq!(
            std::fs::read_link(root.join("init")).unwrap(),
            PathBuf::from("bin/sh")
        );
    }

    #[test]
    fn dir_base_is_unsupported() {
        assert!(matches!(
            open_reader(Format::Dir, Path::new("/tmp")),
            Err(ArchiveError::DirBaseUnsupported)
        ));
    }

    #[test]
    fn format_parses_by_name() {
        assert_eq!("cpio".parse::<Format>().unwrap(), Format::Cpio);
        assert_eq!("dir".parse::<Format>().unwrap(), Format::Dir);
        assert!("tar".parse::<Format>().is_err());
    }
}
