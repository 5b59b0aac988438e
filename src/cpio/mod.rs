//! Archive record model and cpio (newc) codec.
//!
//! Everything that knows about the on-disk container format lives here:
//! the [`Record`] type, the traits for reading and writing record streams,
//! an in-memory [`Archive`] used by tests and the reconciler, and the
//! newc reader/writer in [`newc`].
//!
//! The rest of the crate treats records as opaque values; only symlinks
//! and directories are ever synthesized outside this module.

pub mod newc;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the trailer record terminating a cpio archive.
pub const TRAILER: &str = "TRAILER!!!";

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// The kind of entry a record represents, derived from its mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    File,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

/// Where a record's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    /// No content (directories, device nodes).
    Empty,
    /// Content held in memory (symlink targets, synthesized files,
    /// records read back from an archive).
    Bytes(Vec<u8>),
    /// Content read from the filesystem at write time.
    File(PathBuf),
}

impl RecordData {
    /// Content length in bytes.
    pub fn len(&self) -> io::Result<u64> {
        match self {
            RecordData::Empty => Ok(0),
            RecordData::Bytes(b) => Ok(b.len() as u64),
            RecordData::File(p) => Ok(std::fs::metadata(p)?.len()),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Materialize the content.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        match self {
            RecordData::Empty => Ok(Vec::new()),
            RecordData::Bytes(b) => Ok(b.clone()),
            RecordData::File(p) => std::fs::read(p),
        }
    }
}

/// One named archive entry with metadata and a content reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Archive-relative, slash-separated path.
    pub name: String,
    /// Full mode: file type bits plus permissions.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
    /// Device major/minor for device nodes; zero otherwise.
    pub rmajor: u32,
    pub rminor: u32,
    pub data: RecordData,
}

impl Record {
    /// A directory entry with the given permissions.
    pub fn directory(name: impl Into<String>, mode: u32) -> Record {
        Record {
            name: name.into(),
            mode: S_IFDIR | (mode & 0o7777),
            uid: 0,
            gid: 0,
            mtime: 0,
            rmajor: 0,
            rminor: 0,
            data: RecordData::Empty,
        }
    }

    /// A symlink entry pointing at `target`.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Record {
        Record {
            name: name.into(),
            mode: S_IFLNK | 0o777,
            uid: 0,
            gid: 0,
            mtime: 0,
            rmajor: 0,
            rminor: 0,
            data: RecordData::Bytes(target.into().into_bytes()),
        }
    }

    /// A regular file with in-memory contents.
    pub fn static_file(name: impl Into<String>, contents: impl Into<Vec<u8>>, mode: u32) -> Record {
        Record {
            name: name.into(),
            mode: S_IFREG | (mode & 0o7777),
            uid: 0,
            gid: 0,
            mtime: 0,
            rmajor: 0,
            rminor: 0,
            data: RecordData::Bytes(contents.into()),
        }
    }

    /// A character device node.
    pub fn char_device(name: impl Into<String>, mode: u32, rmajor: u32, rminor: u32) -> Record {
        Record {
            name: name.into(),
            mode: S_IFCHR | (mode & 0o7777),
            uid: 0,
            gid: 0,
            mtime: 0,
            rmajor,
            rminor,
            data: RecordData::Empty,
        }
    }

    /// Build a record for an existing filesystem path, named `name` in the
    /// archive. The path is lstat'ed, so symlinks yield symlink records.
    pub fn from_path(src: &Path, name: impl Into<String>) -> io::Result<Record> {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::symlink_metadata(src)?;
        let mode = meta.mode();
        let data = if meta.file_type().is_symlink() {
            let target = std::fs::read_link(src)?;
            RecordData::Bytes(target.to_string_lossy().into_owned().into_bytes())
        } else if meta.is_file() {
            RecordData::File(src.to_path_buf())
        } else {
            RecordData::Empty
        };
        Ok(Record {
            name: name.into(),
            mode,
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: meta.mtime().max(0) as u64,
            rmajor: ((meta.rdev() >> 8) & 0xfff) as u32,
            rminor: (meta.rdev() & 0xff) as u32,
            data,
        })
    }

    pub fn kind(&self) -> RecordKind {
        match self.mode & S_IFMT {
            S_IFREG => RecordKind::File,
            S_IFDIR => RecordKind::Directory,
            S_IFLNK => RecordKind::Symlink,
            S_IFCHR => RecordKind::CharDevice,
            S_IFBLK => RecordKind::BlockDevice,
            S_IFIFO => RecordKind::Fifo,
            S_IFSOCK => RecordKind::Socket,
            _ => RecordKind::Unknown,
        }
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Symlink target, if this record is a symlink.
    pub fn symlink_target(&self) -> Option<String> {
        if self.kind() != RecordKind::Symlink {
            return None;
        }
        self.data.read().ok().map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (mode {:o})", self.name, self.mode)
    }
}

/// Normalize a record so its serialized form is a pure function of its
/// name, mode, and content: owner, group, and mtime are zeroed.
pub fn make_reproducible(mut r: Record) -> Record {
    r.uid = 0;
    r.gid = 0;
    r.mtime = 0;
    r
}

/// A sink accepting a sequential stream of records.
pub trait RecordWriter {
    fn write_record(&mut self, r: Record) -> io::Result<()>;
}

/// A source yielding records until exhausted. `Ok(None)` marks the end of
/// the stream (the trailer, for cpio files).
pub trait RecordReader {
    fn read_record(&mut self) -> io::Result<Option<Record>>;
}

/// An in-memory archive: records keyed by name, sorted.
///
/// Doubles as a record sink and (via [`Archive::into_reader`]) a record
/// source, which is what the reconciler tests build on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Archive {
    pub records: BTreeMap<String, Record>,
}

impl Archive {
    pub fn new() -> Archive {
        Archive::default()
    }

    /// Collect records into an archive. Duplicate names are an error.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> io::Result<Archive> {
        let mut a = Archive::new();
        for r in records {
            if a.records.contains_key(&r.name) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("duplicate record {}", r.name),
                ));
            }
            a.write_record(r)?;
        }
        Ok(a)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the archive as a record stream, in sorted name order.
    pub fn into_reader(self) -> ArchiveReader {
        ArchiveReader {
            iter: self.records.into_values(),
        }
    }
}

impl RecordWriter for Archive {
    fn write_record(&mut self, r: Record) -> io::Result<()> {
        if r.name == TRAILER {
            return Ok(());
        }
        self.records.insert(r.name.clone(), r);
        Ok(())
    }
}

/// Streaming view over an [`Archive`].
pub struct ArchiveReader {
    iter: std::collections::btree_map::IntoValues<String, Record>,
}

impl RecordReader for ArchiveReader {
    fn read_record(&mut self) -> io::Result<Option<Record>> {
        Ok(self.iter.next())
    }
}
