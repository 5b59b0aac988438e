//! Builders compile command packages into archive entries.
//!
//! A builder takes a list of cargo package directories and stages the
//! resulting binaries into the [`FileTree`], under its binary directory
//! (`bin` for standalone binaries, `bbin` for the multicall set). All
//! builders run before the tree is reconciled with the base archive, so
//! built binaries take precedence over base contents.

mod binary;
mod multicall;

pub use binary::BinaryBuilder;
pub use multicall::MulticallBuilder;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::env::BuildEnv;
use crate::resolve::ResolveError;
use crate::tree::{FileTree, TreeError};

#[derive(Debug, Error)]
pub enum BuildError {
    /// No build environment was supplied.
    #[error("no build environment specified")]
    EnvMissing,

    /// No temporary directory was supplied for build artifacts.
    #[error("no temporary directory specified")]
    TempDirMissing,

    #[error("cargo not found on PATH: {0}")]
    CargoMissing(#[from] which::Error),

    #[error("package {package:?} does not exist (no Cargo.toml)")]
    PackageNotFound { package: PathBuf },

    #[error("building package {package:?} failed:\n{stderr}")]
    BinaryFailed { package: String, stderr: String },

    /// The multicall dispatcher failed to generate or compile. The CLI
    /// keeps the temporary directory around on this one so the
    /// generated source can be inspected.
    #[error("multicall build failed: {0}")]
    Multicall(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BuildError {
    /// True for failures inside the multicall dispatcher build.
    pub fn is_multicall(&self) -> bool {
        matches!(self, BuildError::Multicall(_))
    }
}

/// One builder invocation: which packages, for which target, staged
/// where.
#[derive(Debug, Clone)]
pub struct BuildOpts {
    /// Compilation environment. Required.
    pub env: Option<BuildEnv>,
    /// Package directories to compile.
    pub packages: Vec<PathBuf>,
    /// Scratch directory for target dirs and staged binaries. Required.
    pub temp_dir: PathBuf,
    /// Archive directory to place binaries in; empty means the
    /// builder's default.
    pub binary_dir: String,
}

impl BuildOpts {
    /// The archive directory binaries land in.
    pub fn binary_dir<'a>(&'a self, builder: &dyn Builder) -> &'a str {
        if self.binary_dir.is_empty() {
            builder.default_binary_dir()
        } else {
            &self.binary_dir
        }
    }

    pub(crate) fn check(&self) -> Result<&BuildEnv, BuildError> {
        let env = self.env.as_ref().ok_or(BuildError::EnvMissing)?;
        if self.temp_dir.as_os_str().is_empty() {
            return Err(BuildError::TempDirMissing);
        }
        which::which("cargo")?;
        Ok(env)
    }
}

/// Compiles packages and stages the results into the tree.
pub trait Builder {
    /// Where this builder's binaries live when the caller doesn't say.
    fn default_binary_dir(&self) -> &'static str;

    /// Compile `opts.packages` and add the results to `tree`.
    fn build(&self, tree: &mut FileTree, opts: &BuildOpts) -> Result<(), BuildError>;
}

/// Verify every package directory holds a cargo package, and pair each
/// with its command name.
pub(crate) fn check_packages(packages: &[PathBuf]) -> Result<Vec<(String, PathBuf)>, BuildError> {
    let mut units = Vec::with_capacity(packages.len());
    for pkg in packages {
        if !pkg.join("Cargo.toml").is_file() {
            return Err(BuildError::PackageNotFound {
                package: pkg.clone(),
            });
        }
        units.push((crate::resolve::command_name(pkg)?, pkg.clone()));
    }
    Ok(units)
}
