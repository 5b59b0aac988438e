//! Shared test utilities for rampack tests.
#![allow(dead_code)]

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rampack::cpio::{newc, Archive, RecordReader, RecordWriter};

/// Write a minimal zero-dependency command package under `root/name`.
///
/// The package follows the multicall convention: the library target
/// exposes `pub fn main()`, the binary target calls it, and the package
/// name matches the directory basename. Running it prints `message`.
pub fn write_package(root: &Path, name: &str, message: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("src")).expect("Failed to create package dir");

    let manifest = format!(
        "[package]\n\
         name = \"{name}\"\n\
         version = \"0.1.0\"\n\
         edition = \"2021\"\n\n\
         [workspace]\n"
    );
    fs::write(dir.join("Cargo.toml"), manifest).expect("Failed to write Cargo.toml");

    fs::write(
        dir.join("src/lib.rs"),
        format!("pub fn main() {{\n    println!(\"{message}\");\n}}\n"),
    )
    .expect("Failed to write lib.rs");

    let ident = name.replace('-', "_");
    fs::write(
        dir.join("src/main.rs"),
        format!("fn main() {{\n    {ident}::main();\n}}\n"),
    )
    .expect("Failed to write main.rs");

    dir
}

/// Read a cpio file back into an in-memory archive.
pub fn read_cpio(path: &Path) -> Archive {
    let f = fs::File::open(path).expect("Failed to open cpio file");
    let mut reader = newc::Reader::new(BufReader::new(f));
    let mut archive = Archive::new();
    while let Some(record) = reader.read_record().expect("Failed to read record") {
        archive.write_record(record).expect("Failed to add record");
    }
    archive
}

/// Restores the previous umask when dropped.
pub struct UmaskGuard(libc::mode_t);

impl UmaskGuard {
    pub fn set(mask: libc::mode_t) -> UmaskGuard {
        UmaskGuard(unsafe { libc::umask(mask) })
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::umask(self.0);
        }
    }
}
