//! Build environment: target platform and build tags.
//!
//! Read from `RAMPACK_OS` / `RAMPACK_ARCH` / `RAMPACK_TAGS` (after `.env`
//! loading), defaulting to the host platform. Templates and CLI flags may
//! override the ambient values later in the modifier pipeline.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

/// Target operating system override.
pub const OS_ENV: &str = "RAMPACK_OS";
/// Target architecture override.
pub const ARCH_ENV: &str = "RAMPACK_ARCH";
/// Comma- or space-separated build tags.
pub const TAGS_ENV: &str = "RAMPACK_TAGS";

/// The environment all package compilations run under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnv {
    pub target_os: String,
    pub target_arch: String,
    /// Free-form build tags, passed to rustc as `--cfg` values.
    pub build_tags: Vec<String>,
}

impl BuildEnv {
    /// The host platform with no tags.
    pub fn host() -> BuildEnv {
        BuildEnv {
            target_os: env::consts::OS.to_string(),
            target_arch: env::consts::ARCH.to_string(),
            build_tags: Vec::new(),
        }
    }

    /// The host platform adjusted by the ambient RAMPACK_* variables.
    pub fn from_env() -> BuildEnv {
        let mut e = BuildEnv::host();
        if let Ok(os) = env::var(OS_ENV) {
            if !os.is_empty() {
                e.target_os = os;
            }
        }
        if let Ok(arch) = env::var(ARCH_ENV) {
            if !arch.is_empty() {
                e.target_arch = arch;
            }
        }
        if let Ok(tags) = env::var(TAGS_ENV) {
            e.build_tags = split_tags(&tags);
        }
        e
    }

    pub fn is_host(&self) -> bool {
        self.target_os == env::consts::OS && self.target_arch == env::consts::ARCH
    }

    /// The `--target` triple for cross builds; `None` for native builds.
    /// Linux targets use musl so staged binaries carry no loader
    /// dependency into the archive.
    pub fn target_triple(&self) -> Option<String> {
        if self.is_host() {
            return None;
        }
        Some(match self.target_os.as_str() {
            "linux" => format!("{}-unknown-linux-musl", self.target_arch),
            os => format!("{}-unknown-{os}", self.target_arch),
        })
    }

    /// RUSTFLAGS value carrying the build tags, if any.
    pub fn rustflags(&self) -> Option<String> {
        if self.build_tags.is_empty() {
            return None;
        }
        Some(
            self.build_tags
                .iter()
                .map(|t| format!("--cfg {t}"))
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    /// Arguments for a `cargo` invocation compiling the package in its
    /// own directory into `target_dir`.
    pub fn cargo_args(&self, target_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--release".to_string(),
            "--target-dir".to_string(),
            target_dir.to_string_lossy().into_owned(),
        ];
        if let Some(triple) = self.target_triple() {
            args.push("--target".to_string());
            args.push(triple);
        }
        args
    }

    /// Where cargo leaves the binary `name` under `target_dir`.
    pub fn binary_path(&self, target_dir: &Path, name: &str) -> PathBuf {
        match self.target_triple() {
            Some(triple) => target_dir.join(triple).join("release").join(name),
            None => target_dir.join("release").join(name),
        }
    }
}

impl fmt::Display for BuildEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={} {}={}",
            OS_ENV, self.target_os, ARCH_ENV, self.target_arch
        )?;
        if !self.build_tags.is_empty() {
            write!(f, " {}={}", TAGS_ENV, self.build_tags.join(","))?;
        }
        Ok(())
    }
}

/// Split a tag list on commas and whitespace.
pub fn split_tags(s: &str) -> Vec<String> {
    s.split([',', ' ', '\t'])
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
